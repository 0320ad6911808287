//! Property-based tests for overflow policies and ring eviction.
//!
//! Both channel flavors have a pure sequential core once no strand is
//! parked: a bounded queue with a drop policy, and a ring with a write
//! cursor. Each is checked against an explicit model over arbitrary
//! capacities and message counts:
//!
//! - `DropOldest` retains the newest `capacity` messages
//! - `DropNewest` retains the earliest `capacity` messages
//! - `Throw` retains the earliest `capacity` messages and hands every
//!   rejected value back intact
//! - unbounded channels retain everything
//! - a lagging ring consumer loses exactly `published - capacity` messages
//!   and then reads the retained suffix in order

mod common;
use common::*;

use fibra::channel::{Channel, OverflowPolicy, RingChannel};
use fibra::error::SendError;
use proptest::prelude::*;

fn policy() -> impl Strategy<Value = OverflowPolicy> {
    prop_oneof![
        Just(OverflowPolicy::DropOldest),
        Just(OverflowPolicy::DropNewest),
        Just(OverflowPolicy::Throw),
    ]
}

/// Drains a closed channel to a vec.
fn drain(chan: &Channel<u32>) -> Vec<u32> {
    let mut out = Vec::new();
    while let Ok(Some(v)) = chan.try_recv() {
        out.push(v);
    }
    out
}

proptest! {
    #[test]
    fn bounded_policies_match_the_window_model(
        capacity in 1usize..8,
        count in 0usize..40,
        policy in policy(),
    ) {
        init_test_logging();
        let chan: Channel<u32> = Channel::bounded(capacity, policy);
        let messages: Vec<u32> = (0..count as u32).collect();

        let mut rejected = Vec::new();
        for &n in &messages {
            match chan.try_send(n) {
                Ok(()) => {}
                Err(SendError::Full(v)) => rejected.push(v),
                Err(other) => prop_assert!(false, "unexpected send error: {other:?}"),
            }
        }
        chan.close();

        let retained = drain(&chan);
        let window = capacity.min(count);
        match policy {
            OverflowPolicy::DropOldest => {
                prop_assert_eq!(&retained, &messages[count - window..]);
                prop_assert!(rejected.is_empty());
            }
            OverflowPolicy::DropNewest => {
                prop_assert_eq!(&retained, &messages[..window]);
                prop_assert!(rejected.is_empty());
            }
            OverflowPolicy::Throw => {
                prop_assert_eq!(&retained, &messages[..window]);
                prop_assert_eq!(&rejected, &messages[window..]);
            }
            OverflowPolicy::Block => unreachable!("not generated"),
        }
    }

    #[test]
    fn unbounded_channels_retain_everything(count in 0usize..64) {
        init_test_logging();
        let chan: Channel<u32> = Channel::unbounded();
        let messages: Vec<u32> = (0..count as u32).collect();
        for &n in &messages {
            chan.try_send(n).expect("unbounded send failed");
        }
        chan.close();
        prop_assert_eq!(drain(&chan), messages);
    }

    #[test]
    fn ring_consumer_loses_exactly_the_overwritten_prefix(
        capacity in 1usize..8,
        count in 0usize..40,
    ) {
        init_test_logging();
        let ring: RingChannel<u32> = RingChannel::new(capacity);
        let mut consumer = ring.new_consumer();

        for n in 0..count as u32 {
            ring.send(n);
        }
        ring.close();

        let expected_lost = count.saturating_sub(capacity) as u64;
        prop_assert_eq!(consumer.lost(), expected_lost);

        let mut seen = Vec::new();
        while let Ok(Some(v)) = consumer.try_recv() {
            seen.push(*v);
        }
        let retained: Vec<u32> = (expected_lost as u32..count as u32).collect();
        prop_assert_eq!(seen, retained);
        prop_assert_eq!(consumer.lost(), 0);
        prop_assert_eq!(consumer.try_recv(), Ok(None));
    }
}
