//! Strands: a uniform handle over fiber- and thread-backed execution units.
//!
//! Every synchronization primitive in this crate suspends by returning
//! `Poll::Pending` after registering a waker. A fiber's waker re-enqueues it
//! on the scheduler; a thread's waker unparks the thread inside [`block_on`].
//! Primitives therefore never need to know which kind of execution unit is
//! waiting; the [`Strand`] carries the difference.
//!
//! Interruption is cooperative: [`Strand::interrupt`] raises a flag and wakes
//! the strand; the primitive it was suspended in observes the flag on its
//! next poll and returns an `Interrupted` condition, deregistering its
//! waiters on drop.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::types::FiberId;

/// What kind of execution unit backs a strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandKind {
    /// A fiber scheduled on the carrier-thread pool.
    Fiber(FiberId),
    /// A plain OS thread driving futures through [`block_on`].
    Thread,
}

#[derive(Debug)]
pub(crate) struct StrandCore {
    kind: StrandKind,
    interrupted: AtomicBool,
    /// Most recent top-level waker; interrupt() nudges it so a suspended
    /// strand re-polls and observes the flag.
    waker: Mutex<Option<Waker>>,
}

/// Uniform handle over a fiber or a thread.
///
/// Cloning yields another handle to the same execution unit.
#[derive(Debug, Clone)]
pub struct Strand {
    core: Arc<StrandCore>,
}

impl Strand {
    pub(crate) fn new(kind: StrandKind) -> Self {
        Self {
            core: Arc::new(StrandCore {
                kind,
                interrupted: AtomicBool::new(false),
                waker: Mutex::new(None),
            }),
        }
    }

    /// The kind of execution unit backing this strand.
    #[must_use]
    pub fn kind(&self) -> StrandKind {
        self.core.kind
    }

    /// Requests interruption: the strand's current or next suspension
    /// unblocks promptly with an `Interrupted` condition.
    pub fn interrupt(&self) {
        self.core.interrupted.store(true, Ordering::SeqCst);
        let waker = self.core.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Whether interruption has been requested and not yet consumed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.core.interrupted.load(Ordering::SeqCst)
    }

    /// Consumes a pending interrupt, returning whether one was pending.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.core.interrupted.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_waker(&self, waker: Waker) {
        *self.core.waker.lock() = Some(waker);
    }

    pub(crate) fn swap_waker(&self, waker: Waker) -> Option<Waker> {
        self.core.waker.lock().replace(waker)
    }

    pub(crate) fn restore_waker(&self, waker: Option<Waker>) {
        *self.core.waker.lock() = waker;
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Strand>> = const { RefCell::new(None) };
}

/// Returns the strand of the calling execution unit, if one is established.
///
/// Inside a fiber this is the fiber's strand; inside [`block_on`] it is the
/// driving thread's strand. Outside both, `None`.
#[must_use]
pub fn current() -> Option<Strand> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Installs `strand` as current for the scope of the returned guard.
pub(crate) fn enter(strand: Strand) -> CurrentGuard {
    let previous = CURRENT.with(|c| c.borrow_mut().replace(strand));
    CurrentGuard { previous }
}

pub(crate) struct CurrentGuard {
    previous: Option<Strand>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Checks and consumes a pending interrupt on the current strand.
///
/// Called by primitives at the top of each poll; consuming matches the
/// interruption contract of the original runtime, where delivery clears the
/// pending flag.
pub(crate) fn take_current_interrupt() -> bool {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .is_some_and(|strand| strand.take_interrupt())
    })
}

struct ThreadUnparker {
    thread: std::thread::Thread,
    notified: AtomicBool,
}

impl Wake for ThreadUnparker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }
}

/// Drives a future to completion on the calling OS thread.
///
/// This is how a heavyweight thread participates in the same suspendable
/// primitives fibers use: the future's waker unparks the thread instead of
/// re-enqueueing a fiber. Establishes a thread-backed [`Strand`] as current
/// for the duration, so interruption and `current()` work uniformly.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = Box::pin(future);
    let unparker = Arc::new(ThreadUnparker {
        thread: std::thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&unparker));
    let mut cx = Context::from_waker(&waker);

    let strand = current().unwrap_or_else(|| Strand::new(StrandKind::Thread));
    // Nested use (block_on inside a fiber poll) must hand the fiber's own
    // waker back when it finishes, or a later interrupt would unpark this
    // thread instead of rescheduling the fiber.
    let saved = strand.swap_waker(waker.clone());
    let _guard = enter(strand.clone());

    let output = loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => break value,
            Poll::Pending => {
                while !unparker.notified.swap(false, Ordering::SeqCst) {
                    std::thread::park();
                }
            }
        }
    };
    strand.restore_waker(saved);
    output
}
