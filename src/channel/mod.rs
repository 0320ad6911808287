//! Strand-blocking channels.
//!
//! Two shapes: a FIFO queue channel ([`Channel`]) with configurable capacity
//! and overflow policy, and a single-producer broadcast ring
//! ([`RingChannel`]) that trades delivery guarantees for a never-blocking
//! producer. Both park strands, never carrier threads: a full or empty
//! channel suspends the calling fiber (or a `block_on` thread) until the
//! wait condition changes.

mod queue;
mod ring;
mod select;

pub use queue::Channel;
pub use ring::{RingChannel, RingConsumer};
pub use select::select_recv;

/// What `send` does when a bounded channel is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the sender until space frees up.
    Block,
    /// Evict the oldest buffered message and enqueue the new one.
    DropOldest,
    /// Silently discard the new message.
    DropNewest,
    /// Fail the send with `SendError::Full`.
    Throw,
}

/// Capacity and overflow policy for a [`Channel`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl ChannelConfig {
    /// A bounded channel. Panics if `capacity` is zero.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity >= 1, "channel capacity must be at least 1");
        Self {
            capacity: Some(capacity),
            policy,
        }
    }

    /// An unbounded channel; the overflow policy never applies.
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            policy: OverflowPolicy::Block,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
