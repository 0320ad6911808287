//! Fiber task record and its state machine.
//!
//! A fiber is an explicit resumable state machine: the spawned computation's
//! future, boxed and owned by a [`FiberTask`]. Suspension captures the whole
//! logical call stack (every local alive across an await point is part of
//! the future's state), and resumption on any carrier thread restores it
//! exactly.
//!
//! State transitions:
//!
//! ```text
//!   SCHEDULED --(carrier pops)--> RUNNING --(Ready)--> COMPLETE
//!       ^                           |  \--(Pending, no wake)--> IDLE
//!       |                           \--(Pending, woken mid-poll: NOTIFIED)
//!       +------(wake on IDLE)-------+
//! ```
//!
//! A wake that finds the task SCHEDULED or NOTIFIED is spurious and is
//! reported to the monitor; correctness never depends on wake counting
//! because every primitive re-checks its wait condition on poll.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

use parking_lot::Mutex;

use crate::strand::{self, Strand};
use crate::types::FiberId;

use super::scheduler::SchedulerShared;

const STATE_IDLE: u8 = 0;
const STATE_SCHEDULED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_NOTIFIED: u8 = 3;
const STATE_COMPLETE: u8 = 4;

pub(crate) struct FiberTask {
    id: FiberId,
    state: AtomicU8,
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    strand: Strand,
    sched: Weak<SchedulerShared>,
    suspended_at: Mutex<Option<Instant>>,
}

impl FiberTask {
    pub(crate) fn new(
        id: FiberId,
        strand: Strand,
        future: Pin<Box<dyn Future<Output = ()> + Send>>,
        sched: Weak<SchedulerShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(STATE_SCHEDULED),
            future: Mutex::new(Some(future)),
            strand,
            sched,
            suspended_at: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    /// Wake path: move the task back to a ready queue if it is idle.
    fn schedule(self: Arc<Self>) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            match state {
                STATE_IDLE => {
                    if self
                        .state
                        .compare_exchange(
                            STATE_IDLE,
                            STATE_SCHEDULED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        if let Some(shared) = self.sched.upgrade() {
                            shared.enqueue(self);
                        }
                        return;
                    }
                }
                STATE_RUNNING => {
                    if self
                        .state
                        .compare_exchange(
                            STATE_RUNNING,
                            STATE_NOTIFIED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                STATE_SCHEDULED | STATE_NOTIFIED => {
                    if let Some(shared) = self.sched.upgrade() {
                        shared.monitor.spurious_wakeup();
                    }
                    return;
                }
                _ => return, // COMPLETE
            }
        }
    }

    /// Runs the task until it completes or suspends. Called by a carrier
    /// thread that popped it from a ready queue (state SCHEDULED).
    pub(crate) fn run(self: &Arc<Self>, shared: &Arc<SchedulerShared>) {
        self.state.store(STATE_RUNNING, Ordering::Release);

        if let Some(since) = self.suspended_at.lock().take() {
            shared.suspended.fetch_sub(1, Ordering::Relaxed);
            shared.monitor.fiber_resumed(self.id);
            shared.monitor.timed_park_latency(since.elapsed());
        }

        let waker = Waker::from(Arc::clone(self));
        self.strand.set_waker(waker.clone());
        let _current = strand::enter(self.strand.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            self.state.store(STATE_COMPLETE, Ordering::Release);
            return;
        };

        // The spawn wrapper catches computation panics itself; this guard
        // only protects the carrier from panics in foreign wakers or
        // monitor callbacks reached through poll.
        let poll = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        match poll {
            Ok(Poll::Ready(())) => {
                *slot = None;
                drop(slot);
                self.complete(shared);
            }
            Err(payload) => {
                *slot = None;
                drop(slot);
                tracing::error!(
                    fiber = %self.id,
                    panic = %crate::types::payload_to_string(payload.as_ref()),
                    "panic escaped fiber wrapper; terminating fiber"
                );
                self.complete(shared);
            }
            Ok(Poll::Pending) => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(
                        STATE_RUNNING,
                        STATE_IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    *self.suspended_at.lock() = Some(Instant::now());
                    shared.suspended.fetch_add(1, Ordering::Relaxed);
                    shared.monitor.fiber_suspended(self.id);
                } else {
                    // Woken while polling: go straight back to ready.
                    self.state.store(STATE_SCHEDULED, Ordering::Release);
                    shared.enqueue(Arc::clone(self));
                }
            }
        }
    }

    fn complete(&self, shared: &SchedulerShared) {
        self.state.store(STATE_COMPLETE, Ordering::Release);
        shared.active.fetch_sub(1, Ordering::Relaxed);
        shared.monitor.fiber_terminated(self.id);
    }
}

impl Wake for FiberTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Arc::clone(self).schedule();
    }
}

impl std::fmt::Debug for FiberTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberTask")
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
