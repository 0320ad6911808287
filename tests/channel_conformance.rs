//! Channel semantics, end to end on a live runtime.
//!
//! Covers:
//! - bounded Block channels: FIFO round-trip with sender suspension past
//!   capacity
//! - the three non-blocking overflow policies (drop-oldest, drop-newest,
//!   throw)
//! - close semantics: `close` drains to end-of-stream, `close_receive`
//!   discards and fails both sides
//! - timeout as an outcome distinct from closure; late messages survive an
//!   expired receive
//! - multi-channel select: exactly-once claiming under concurrent selectors
//! - ring channels: broadcast with loss, lag accounting, attach position

mod common;
use common::*;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibra::block_on;
use fibra::channel::{select_recv, Channel, OverflowPolicy, RingChannel};
use fibra::error::{RecvError, SendError};

#[test]
fn block_policy_round_trip_with_suspension() {
    init_test("block_policy_round_trip_with_suspension");
    let rt = test_runtime();

    let chan: Channel<usize> = Channel::bounded(2, OverflowPolicy::Block);
    let sent = Arc::new(AtomicUsize::new(0));

    let tx = chan.clone();
    let progress = Arc::clone(&sent);
    let sender = rt.spawn(async move {
        for n in 0..5 {
            tx.send(n).await.expect("send failed");
            progress.fetch_add(1, Ordering::SeqCst);
        }
    });

    test_section!("sender fills the buffer and parks");
    assert!(wait_until(Duration::from_secs(2), || {
        sent.load(Ordering::SeqCst) == 2
    }));
    std::thread::sleep(Duration::from_millis(30));
    assert_with_log!(
        sent.load(Ordering::SeqCst) == 2,
        "third send suspends until space frees",
        2usize,
        sent.load(Ordering::SeqCst)
    );

    test_section!("draining releases the sender in order");
    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(block_on(chan.recv()).expect("recv failed").expect("stream ended early"));
    }
    sender.join_blocking().expect("sender failed");
    assert_with_log!(
        received == [0, 1, 2, 3, 4],
        "FIFO order across the suspension",
        [0, 1, 2, 3, 4],
        received
    );

    test_complete!("block_policy_round_trip_with_suspension");
}

#[test]
fn drop_oldest_keeps_the_newest_window() {
    init_test("drop_oldest_keeps_the_newest_window");

    let chan: Channel<u32> = Channel::bounded(3, OverflowPolicy::DropOldest);
    for n in 0..6 {
        chan.try_send(n).expect("drop-oldest never rejects");
    }
    chan.close();

    let mut seen = Vec::new();
    while let Some(n) = block_on(chan.recv()).expect("recv failed") {
        seen.push(n);
    }
    assert_with_log!(seen == [3, 4, 5], "oldest three evicted", [3, 4, 5], seen);

    test_complete!("drop_oldest_keeps_the_newest_window");
}

#[test]
fn drop_newest_keeps_the_earliest_window() {
    init_test("drop_newest_keeps_the_earliest_window");

    let chan: Channel<u32> = Channel::bounded(3, OverflowPolicy::DropNewest);
    for n in 0..6 {
        chan.try_send(n).expect("drop-newest never rejects");
    }
    chan.close();

    let mut seen = Vec::new();
    while let Some(n) = block_on(chan.recv()).expect("recv failed") {
        seen.push(n);
    }
    assert_with_log!(seen == [0, 1, 2], "overflow discarded on arrival", [0, 1, 2], seen);

    test_complete!("drop_newest_keeps_the_earliest_window");
}

#[test]
fn throw_policy_reports_full_and_returns_the_value() {
    init_test("throw_policy_reports_full_and_returns_the_value");

    let chan: Channel<String> = Channel::bounded(1, OverflowPolicy::Throw);
    chan.try_send("kept".to_string()).expect("first send failed");

    let err = chan
        .try_send("rejected".to_string())
        .expect_err("overflow must fail");
    match err {
        SendError::Full(value) => {
            assert_with_log!(value == "rejected", "value handed back intact", "rejected", value);
        }
        other => panic!("expected Full, got {other:?}"),
    }

    // The async path fails the same way instead of suspending.
    let err = block_on(chan.send("also rejected".to_string()))
        .expect_err("async overflow must fail");
    assert!(matches!(err, SendError::Full(_)));

    assert_eq!(chan.len(), 1);

    test_complete!("throw_policy_reports_full_and_returns_the_value");
}

#[test]
fn close_drains_then_signals_end_of_stream() {
    init_test("close_drains_then_signals_end_of_stream");

    let chan: Channel<u8> = Channel::unbounded();
    chan.try_send(1).expect("send failed");
    chan.try_send(2).expect("send failed");
    chan.close();

    let err = chan.try_send(3).expect_err("send after close must fail");
    assert!(matches!(err, SendError::Closed(3)));

    assert_eq!(block_on(chan.recv()), Ok(Some(1)));
    assert_eq!(block_on(chan.recv()), Ok(Some(2)));
    assert_eq!(block_on(chan.recv()), Ok(None), "drained close is end-of-stream");
    assert_eq!(block_on(chan.recv()), Ok(None), "end-of-stream is sticky");

    test_complete!("close_drains_then_signals_end_of_stream");
}

#[test]
fn close_receive_discards_and_fails_both_sides() {
    init_test("close_receive_discards_and_fails_both_sides");

    let chan: Channel<u8> = Channel::unbounded();
    chan.try_send(1).expect("send failed");
    chan.try_send(2).expect("send failed");
    chan.close_receive();

    let outcome = block_on(chan.recv());
    assert_with_log!(
        outcome == Err(RecvError::Closed),
        "receive side is closed, buffered messages discarded",
        Err::<Option<u8>, _>(RecvError::Closed),
        outcome
    );
    assert!(matches!(
        chan.try_send(3),
        Err(SendError::Closed(3))
    ));
    assert!(chan.is_empty());

    test_complete!("close_receive_discards_and_fails_both_sides");
}

#[test]
fn timeout_is_distinct_from_closure() {
    init_test("timeout_is_distinct_from_closure");
    let rt = test_runtime();

    let chan: Channel<u32> = Channel::unbounded();

    let rx = chan.clone();
    let handle = rt.spawn(async move {
        let first = rx.recv_timeout(Duration::from_millis(30)).await;
        assert_eq!(first, Err(RecvError::Timeout), "empty open channel times out");

        // A message arriving after the expiry is not lost.
        let second = rx.recv_timeout(Duration::from_secs(5)).await;
        assert_eq!(second, Ok(Some(7)));
    });

    std::thread::sleep(Duration::from_millis(60));
    chan.try_send(7).expect("send failed");
    handle.join_blocking().expect("receiver fiber failed");

    test_complete!("timeout_is_distinct_from_closure");
}

#[test]
fn select_claims_each_message_exactly_once() {
    init_test("select_claims_each_message_exactly_once");
    let rt = test_runtime_with_carriers(4);

    let a: Channel<u32> = Channel::unbounded();
    let b: Channel<u32> = Channel::unbounded();
    let results: Channel<u32> = Channel::unbounded();

    test_section!("single ready branch resolves with its index");
    b.try_send(1000).expect("send failed");
    let (index, value) = block_on(select_recv(&[&a, &b])).expect("select failed");
    assert_with_log!(
        (index, value) == (1, Some(1000)),
        "select reports the ready branch",
        (1usize, Some(1000u32)),
        (index, value)
    );

    test_section!("concurrent selectors split a shared stream without loss");
    let mut selectors = Vec::new();
    for _ in 0..3 {
        let a = a.clone();
        let b = b.clone();
        let out = results.clone();
        selectors.push(rt.spawn(async move {
            loop {
                match select_recv(&[&a, &b]).await.expect("select failed") {
                    (_, Some(v)) => out.send(v).await.expect("forward failed"),
                    (_, None) => break,
                }
            }
            // End-of-stream on one branch; the other may still hold a tail.
            while let Ok(Some(v)) = a.try_recv() {
                out.send(v).await.expect("forward failed");
            }
            while let Ok(Some(v)) = b.try_recv() {
                out.send(v).await.expect("forward failed");
            }
        }));
    }

    for n in 0..200u32 {
        if n % 2 == 0 {
            a.try_send(n).expect("send failed");
        } else {
            b.try_send(n).expect("send failed");
        }
    }
    a.close();
    b.close();
    for s in &selectors {
        s.join_blocking().expect("selector fiber failed");
    }
    results.close();

    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    while let Some(v) = block_on(results.recv()).expect("recv failed") {
        *counts.entry(v).or_default() += 1;
    }
    assert_with_log!(
        counts.len() == 200,
        "every message was delivered",
        200usize,
        counts.len()
    );
    assert!(
        counts.values().all(|&c| c == 1),
        "a message was claimed by more than one selector: {counts:?}"
    );

    test_complete!("select_claims_each_message_exactly_once", delivered = counts.len());
}

#[test]
fn ring_broadcasts_with_loss() {
    init_test("ring_broadcasts_with_loss");

    let ring: RingChannel<u64> = RingChannel::new(4);
    let mut early = ring.new_consumer();

    for n in 0..10 {
        ring.send(n);
    }
    // Attached after publishing: sees only what comes next.
    let mut late = ring.new_consumer();
    ring.send(10);
    ring.close();

    test_section!("lagging consumer resumes at head minus capacity");
    let lost = early.lost();
    assert_with_log!(lost == 7, "evictions counted before the first read", 7u64, lost);

    let first = early.try_recv().expect("ring recv failed").expect("stream ended");
    assert_with_log!(*first == 7, "oldest retained message after eviction", 7u64, *first);

    let mut rest = Vec::new();
    while let Some(v) = block_on(early.recv()).expect("ring recv failed") {
        rest.push(*v);
    }
    assert_eq!(rest, [8, 9, 10]);
    assert_eq!(early.lost(), 0, "loss counter does not grow while caught up");

    test_section!("late consumer starts at its attach position");
    let mut late_seen = Vec::new();
    while let Some(v) = block_on(late.recv()).expect("ring recv failed") {
        late_seen.push(*v);
    }
    assert_eq!(late_seen, [10]);
    assert_eq!(late.lost(), 0);

    test_complete!("ring_broadcasts_with_loss");
}

#[test]
fn ring_producer_never_blocks_on_slow_consumers() {
    init_test("ring_producer_never_blocks_on_slow_consumers");
    let rt = test_runtime();

    let ring: RingChannel<u64> = RingChannel::new(8);
    let mut consumer = ring.new_consumer();

    let consumed = rt.spawn(async move {
        let mut last = None;
        let mut count = 0u64;
        while let Some(v) = consumer.recv().await.expect("ring recv failed") {
            last = Some(*v);
            count += 1;
        }
        (last, count)
    });

    // Far more than capacity; the producer finishes regardless of the
    // consumer's pace.
    for n in 0..10_000u64 {
        ring.send(n);
    }
    ring.close();

    let (last, count) = consumed.get_blocking().expect("consumer fiber failed");
    assert_with_log!(
        last == Some(9_999),
        "consumer observes the newest message",
        Some(9_999u64),
        last
    );
    assert!(count <= 10_000, "never delivers more than was published");
    assert!(count >= 1, "the final message always survives");

    test_complete!("ring_producer_never_blocks_on_slow_consumers", received = count);
}
