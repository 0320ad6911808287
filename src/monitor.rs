//! Fiber lifecycle monitoring.
//!
//! The scheduler emits lifecycle events to a [`FiberMonitor`] passed in at
//! runtime construction. There is no process-wide metrics singleton: a
//! monitor instance is explicit wiring, and the default is a no-op.
//!
//! Monitor callbacks are side-effect only and are called from carrier
//! threads on hot paths. Implementations must be cheap and must not panic;
//! a panicking monitor is a contract violation, not a scheduler failure mode
//! (the fiber panic guard keeps it from corrupting scheduler state, but the
//! event is lost).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::FiberId;

/// Receiver of fiber lifecycle and scheduling events.
///
/// All methods have empty default bodies so implementations can observe only
/// the events they care about.
pub trait FiberMonitor: Send + Sync + 'static {
    /// A fiber was spawned and enqueued ready for the first time.
    fn fiber_started(&self, _fiber: FiberId) {}

    /// A fiber terminated, normally or with a captured failure.
    fn fiber_terminated(&self, _fiber: FiberId) {}

    /// A fiber reached a suspension point and released its carrier thread.
    fn fiber_suspended(&self, _fiber: FiberId) {}

    /// A suspended fiber was re-enqueued and resumed on a carrier thread.
    fn fiber_resumed(&self, _fiber: FiberId) {}

    /// A wakeup arrived for a fiber that was already scheduled or running.
    ///
    /// Observational only; the scheduler tolerates spurious wakeups by
    /// re-checking wait conditions.
    fn spurious_wakeup(&self) {}

    /// Time a fiber spent suspended before being resumed.
    fn timed_park_latency(&self, _latency: Duration) {}
}

/// Monitor that ignores every event. The default for new runtimes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl FiberMonitor for NoopMonitor {}

/// Monitor that logs every event through `tracing` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceMonitor;

impl FiberMonitor for TraceMonitor {
    fn fiber_started(&self, fiber: FiberId) {
        tracing::trace!(%fiber, "fiber started");
    }

    fn fiber_terminated(&self, fiber: FiberId) {
        tracing::trace!(%fiber, "fiber terminated");
    }

    fn fiber_suspended(&self, fiber: FiberId) {
        tracing::trace!(%fiber, "fiber suspended");
    }

    fn fiber_resumed(&self, fiber: FiberId) {
        tracing::trace!(%fiber, "fiber resumed");
    }

    fn spurious_wakeup(&self) {
        tracing::trace!("spurious wakeup");
    }

    fn timed_park_latency(&self, latency: Duration) {
        tracing::trace!(latency_us = latency.as_micros() as u64, "park latency");
    }
}

/// Monitor that counts events; used by tests and simple gauges.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    started: AtomicU64,
    terminated: AtomicU64,
    suspended: AtomicU64,
    resumed: AtomicU64,
    spurious: AtomicU64,
}

impl CountingMonitor {
    /// Creates a monitor with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fiber_started` events observed.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Number of `fiber_terminated` events observed.
    #[must_use]
    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }

    /// Number of `fiber_suspended` events observed.
    #[must_use]
    pub fn suspended(&self) -> u64 {
        self.suspended.load(Ordering::Relaxed)
    }

    /// Number of `fiber_resumed` events observed.
    #[must_use]
    pub fn resumed(&self) -> u64 {
        self.resumed.load(Ordering::Relaxed)
    }

    /// Number of spurious wakeups observed.
    #[must_use]
    pub fn spurious(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }
}

impl FiberMonitor for CountingMonitor {
    fn fiber_started(&self, _fiber: FiberId) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn fiber_terminated(&self, _fiber: FiberId) {
        self.terminated.fetch_add(1, Ordering::Relaxed);
    }

    fn fiber_suspended(&self, _fiber: FiberId) {
        self.suspended.fetch_add(1, Ordering::Relaxed);
    }

    fn fiber_resumed(&self, _fiber: FiberId) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    fn spurious_wakeup(&self) {
        self.spurious.fetch_add(1, Ordering::Relaxed);
    }
}
