//! Timed suspension: `sleep`, deadlines, and the timer driver.
//!
//! A single lazily-started driver thread owns a deadline heap and wakes
//! registered wakers as their instants pass. Both fibers (carrier-thread
//! wakers) and plain threads (`block_on` unpark wakers) register through the
//! same driver, so timed operations behave identically for every strand kind.
//!
//! Registrations are keyed; `Sleep` deregisters on drop, so an operation that
//! completes (or is interrupted) before its deadline leaves nothing behind.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Key identifying one timer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TimerKey(u64);

struct TimerEntry {
    deadline: Instant,
    key: TimerKey,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.key == other.key
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.key.0.cmp(&other.key.0))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    /// Keys registered and neither fired nor cancelled. A heap entry whose
    /// key left this set is dead and is discarded when it surfaces, so
    /// cancelling a timer that already fired is a no-op rather than a
    /// tombstone that accumulates.
    live: HashSet<TimerKey>,
}

struct TimerDriver {
    state: Mutex<TimerState>,
    condvar: Condvar,
    next_key: AtomicU64,
}

impl TimerDriver {
    fn register(&self, deadline: Instant, waker: Waker) -> TimerKey {
        let key = TimerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.live.insert(key);
        state.heap.push(Reverse(TimerEntry {
            deadline,
            key,
            waker,
        }));
        drop(state);
        self.condvar.notify_one();
        key
    }

    fn cancel(&self, key: TimerKey) {
        let mut state = self.state.lock();
        state.live.remove(&key);
    }

    fn run(&self) {
        loop {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut due: Vec<Waker> = Vec::new();
            let mut next_deadline: Option<Instant> = None;
            {
                let st = &mut *state;
                loop {
                    match st.heap.peek() {
                        Some(Reverse(entry)) => {
                            if !st.live.contains(&entry.key) {
                                st.heap.pop();
                            } else if entry.deadline <= now {
                                if let Some(Reverse(fired)) = st.heap.pop() {
                                    st.live.remove(&fired.key);
                                    due.push(fired.waker);
                                }
                            } else {
                                next_deadline = Some(entry.deadline);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            if !due.is_empty() {
                // Wake outside the lock so wakers can re-register freely.
                drop(state);
                for waker in due {
                    waker.wake();
                }
                continue;
            }
            match next_deadline {
                Some(deadline) => {
                    let _ = self.condvar.wait_until(&mut state, deadline);
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }
}

fn driver() -> &'static Arc<TimerDriver> {
    static DRIVER: OnceLock<Arc<TimerDriver>> = OnceLock::new();
    DRIVER.get_or_init(|| {
        let driver = Arc::new(TimerDriver {
            state: Mutex::new(TimerState::default()),
            condvar: Condvar::new(),
            next_key: AtomicU64::new(1),
        });
        let runner = Arc::clone(&driver);
        std::thread::Builder::new()
            .name("fibra-timer".into())
            .spawn(move || runner.run())
            .expect("failed to spawn timer thread");
        driver
    })
}

/// Future that completes when its deadline passes.
///
/// Cheap to poll; each pending poll refreshes the registered waker. Dropping
/// the future cancels the registration.
#[derive(Debug)]
pub struct Sleep {
    deadline: Instant,
    key: Option<u64>,
}

impl Sleep {
    /// The instant this sleep elapses.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Suspends the calling strand for the given duration.
#[must_use]
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Suspends the calling strand until the given instant.
#[must_use]
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        key: None,
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if Instant::now() >= this.deadline {
            if let Some(key) = this.key.take() {
                driver().cancel(TimerKey(key));
            }
            return Poll::Ready(());
        }
        // Re-register with the current waker; the stale entry is cancelled.
        if let Some(key) = this.key.take() {
            driver().cancel(TimerKey(key));
        }
        let key = driver().register(this.deadline, cx.waker().clone());
        this.key = Some(key.0);
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            driver().cancel(TimerKey(key));
        }
    }
}

/// Marker error for an elapsed [`Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// Future adaptor racing an inner future against a deadline.
///
/// The inner future wins ties: a value that is ready at the same poll as the
/// deadline is delivered. Once the deadline fires the inner future is dropped
/// on completion, deregistering any waiters it holds.
#[derive(Debug)]
pub struct Timeout<F> {
    inner: F,
    sleep: Sleep,
}

/// Applies a deadline to a future.
pub fn timeout<F: Future + Unpin>(duration: Duration, inner: F) -> Timeout<F> {
    deadline_at(Instant::now() + duration, inner)
}

/// Applies an absolute deadline to a future.
pub fn deadline_at<F: Future + Unpin>(deadline: Instant, inner: F) -> Timeout<F> {
    Timeout {
        inner,
        sleep: sleep_until(deadline),
    }
}

impl<F: Future + Unpin> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = Pin::new(&mut this.inner).poll(cx) {
            return Poll::Ready(Ok(value));
        }
        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
