//! Core identifier and payload types shared across the runtime.
//!
//! Identifiers are plain `u64` newtypes minted from process-wide monotonic
//! counters. They are never reused within a process lifetime, which lets
//! supervision edges and correlator entries key on them without ABA concerns.

use std::sync::atomic::{AtomicU64, Ordering};

static FIBER_COUNTER: AtomicU64 = AtomicU64::new(1);
static ACTOR_COUNTER: AtomicU64 = AtomicU64::new(1);
static WATCH_COUNTER: AtomicU64 = AtomicU64::new(1);
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl FiberId {
    pub(crate) fn next() -> Self {
        Self(FIBER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FiberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fiber-{}", self.0)
    }
}

/// Unique identifier of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        Self(ACTOR_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Token identifying one watch edge between a watcher and a watched actor.
///
/// Multiple independent watches on the same actor pair receive distinct
/// tokens, so their termination notifications are distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(u64);

impl WatchToken {
    pub(crate) fn next() -> Self {
        Self(WATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Correlation id pairing a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a fiber, tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created but not yet run by a carrier thread.
    New,
    /// Currently being executed on a carrier thread.
    Running,
    /// Detached from its carrier, waiting on a resource.
    Suspended,
    /// Finished, result or failure captured.
    Terminated,
}

/// Captured payload of a panic that terminated a fiber or actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload from the stringified panic message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Converts a boxed panic payload into a readable message.
#[must_use]
pub(crate) fn payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload of unknown type".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = FiberId::next();
        let b = FiberId::next();
        assert!(b.id() > a.id());

        let w1 = WatchToken::next();
        let w2 = WatchToken::next();
        assert_ne!(w1, w2);
    }

    #[test]
    fn payload_to_string_handles_common_types() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(payload_to_string(s.as_ref()), "static str");

        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(payload_to_string(s.as_ref()), "owned");

        let s: Box<dyn std::any::Any + Send> = Box::new(17_u32);
        assert_eq!(payload_to_string(s.as_ref()), "panic payload of unknown type");
    }
}
