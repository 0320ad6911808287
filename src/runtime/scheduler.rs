//! Carrier thread pool: per-worker local queues, a global injector, and
//! work stealing.
//!
//! Each carrier owns a local deque protected by a light mutex. A task woken
//! from one of this scheduler's own carriers goes to that carrier's local
//! queue; wakes arriving from foreign threads land in the shared injector.
//! A carrier that runs dry drains the injector, then steals half of a
//! sibling's local queue before parking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::monitor::FiberMonitor;

use super::task::FiberTask;

/// How long a carrier parks before re-checking the queues. Bounds the
/// window of a wakeup notification racing past a parking carrier.
const PARK_INTERVAL: Duration = Duration::from_millis(5);

thread_local! {
    static CARRIER: RefCell<Option<(usize, Weak<SchedulerShared>)>> =
        const { RefCell::new(None) };
}

pub(crate) struct SchedulerShared {
    injector: SegQueue<Arc<FiberTask>>,
    locals: Vec<Mutex<VecDeque<Arc<FiberTask>>>>,
    parked: Mutex<usize>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    pub(crate) monitor: Arc<dyn FiberMonitor>,
    /// Fibers spawned and not yet terminated.
    pub(crate) active: AtomicUsize,
    /// Fibers currently parked waiting for a wake.
    pub(crate) suspended: AtomicUsize,
}

impl SchedulerShared {
    pub(crate) fn new(carriers: usize, monitor: Arc<dyn FiberMonitor>) -> Arc<Self> {
        Arc::new(Self {
            injector: SegQueue::new(),
            locals: (0..carriers).map(|_| Mutex::new(VecDeque::new())).collect(),
            parked: Mutex::new(0),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            monitor,
            active: AtomicUsize::new(0),
            suspended: AtomicUsize::new(0),
        })
    }

    pub(crate) fn enqueue(self: &Arc<Self>, task: Arc<FiberTask>) {
        let local = CARRIER.with(|slot| {
            slot.borrow().as_ref().and_then(|(index, sched)| {
                let same = sched
                    .upgrade()
                    .is_some_and(|shared| Arc::ptr_eq(&shared, self));
                same.then_some(*index)
            })
        });
        match local {
            Some(index) => self.locals[index].lock().push_back(task),
            None => self.injector.push(task),
        }
        if *self.parked.lock() > 0 {
            self.wakeup.notify_one();
        }
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.notify_all();
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Main loop for carrier `index`. Returns when shutdown is requested
    /// and no work remains visible.
    pub(crate) fn carrier_loop(self: Arc<Self>, index: usize) {
        CARRIER.with(|slot| {
            *slot.borrow_mut() = Some((index, Arc::downgrade(&self)));
        });

        loop {
            if let Some(task) = self.next_task(index) {
                task.run(&self);
                continue;
            }
            if self.is_shutting_down() {
                break;
            }
            let mut parked = self.parked.lock();
            *parked += 1;
            let _ = self
                .wakeup
                .wait_for(&mut parked, PARK_INTERVAL)
                .timed_out();
            *parked -= 1;
        }

        CARRIER.with(|slot| {
            *slot.borrow_mut() = None;
        });
    }

    fn next_task(&self, index: usize) -> Option<Arc<FiberTask>> {
        if let Some(task) = self.locals[index].lock().pop_front() {
            return Some(task);
        }
        if let Some(task) = self.injector.pop() {
            return Some(task);
        }
        self.steal(index)
    }

    /// Takes half of the largest sibling queue, keeping one task to run now
    /// and moving the rest into our local queue.
    fn steal(&self, index: usize) -> Option<Arc<FiberTask>> {
        for offset in 1..self.locals.len() {
            let victim = (index + offset) % self.locals.len();
            let mut batch = {
                let mut queue = self.locals[victim].lock();
                let take = queue.len().div_ceil(2);
                if take == 0 {
                    continue;
                }
                queue.drain(..take).collect::<VecDeque<_>>()
            };
            let first = batch.pop_front();
            if !batch.is_empty() {
                self.locals[index].lock().append(&mut batch);
            }
            if first.is_some() {
                return first;
            }
        }
        None
    }
}

impl std::fmt::Debug for SchedulerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerShared")
            .field("carriers", &self.locals.len())
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("suspended", &self.suspended.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
