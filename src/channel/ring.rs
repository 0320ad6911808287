//! Single-producer broadcast ring.
//!
//! The producer never blocks: at capacity it overwrites the oldest entry
//! and advances the head. Each consumer tracks its own cursor into a
//! monotonic sequence of write positions; a consumer that falls more than
//! `capacity` behind skips forward to the oldest entry still present and
//! the overwritten messages are lost to it. Within the surviving window
//! every consumer observes the producer's order with no gaps.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::RecvError;
use crate::strand;
use crate::time;

/// Producer handle for a broadcast ring. Values are shared with consumers
/// as `Arc<T>` clones.
pub struct RingChannel<T> {
    inner: Arc<RingInner<T>>,
}

impl<T> Clone for RingChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RingInner<T> {
    capacity: usize,
    state: Mutex<RingState<T>>,
}

struct RingState<T> {
    /// `buf[0]` holds write position `head`.
    buf: VecDeque<Arc<T>>,
    head: u64,
    /// Next write position; `head + buf.len()`.
    cursor: u64,
    closed: bool,
    next_token: u64,
    waiters: Vec<(u64, Waker)>,
}

impl<T: Send + Sync + 'static> RingChannel<T> {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring capacity must be at least 1");
        Self {
            inner: Arc::new(RingInner {
                capacity,
                state: Mutex::new(RingState {
                    buf: VecDeque::with_capacity(capacity),
                    head: 0,
                    cursor: 0,
                    closed: false,
                    next_token: 0,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Publishes a value. Never blocks; at capacity the oldest entry is
    /// overwritten. Publishing on a closed ring is a no-op.
    pub fn send(&self, value: T) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        if state.buf.len() == self.inner.capacity {
            state.buf.pop_front();
            state.head += 1;
        }
        state.buf.push_back(Arc::new(value));
        state.cursor += 1;
        for (_, waker) in state.waiters.drain(..) {
            waker.wake();
        }
    }

    /// Closes the ring for send. Consumers drain what remains, then see
    /// end-of-stream. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for (_, waker) in state.waiters.drain(..) {
            waker.wake();
        }
    }

    /// Attaches a consumer at the current write position: it sees only
    /// messages published after this call.
    pub fn new_consumer(&self) -> RingConsumer<T> {
        let state = self.inner.state.lock();
        RingConsumer {
            inner: Arc::clone(&self.inner),
            cursor: state.cursor,
        }
    }
}

impl<T> std::fmt::Debug for RingChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RingChannel")
            .field("capacity", &self.inner.capacity)
            .field("buffered", &state.buf.len())
            .field("cursor", &state.cursor)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Independent read cursor into a [`RingChannel`].
pub struct RingConsumer<T> {
    inner: Arc<RingInner<T>>,
    cursor: u64,
}

impl<T: Send + Sync + 'static> RingConsumer<T> {
    /// Non-blocking read. `Err(Empty)` when caught up on an open ring,
    /// `Ok(None)` when caught up on a closed one.
    pub fn try_recv(&mut self) -> Result<Option<Arc<T>>, RecvError> {
        let inner = Arc::clone(&self.inner);
        let state = inner.state.lock();
        self.take_next(&state)
    }

    /// Waits for the next message. `Ok(None)` is end-of-stream.
    pub async fn recv(&mut self) -> Result<Option<Arc<T>>, RecvError> {
        RingRecv {
            consumer: self,
            token: None,
        }
        .await
    }

    /// [`recv`](Self::recv) with a deadline.
    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<Option<Arc<T>>, RecvError> {
        let deadline = Instant::now() + duration;
        let future = RingRecv {
            consumer: self,
            token: None,
        };
        match time::deadline_at(deadline, future).await {
            Ok(outcome) => outcome,
            Err(time::Elapsed) => Err(RecvError::Timeout),
        }
    }

    /// Messages overwritten before this consumer could read them. Resets
    /// the cursor to the oldest surviving entry as `recv` would.
    pub fn lost(&mut self) -> u64 {
        let inner = Arc::clone(&self.inner);
        let state = inner.state.lock();
        if self.cursor < state.head {
            let lost = state.head - self.cursor;
            self.cursor = state.head;
            lost
        } else {
            0
        }
    }

    fn take_next(&mut self, state: &RingState<T>) -> Result<Option<Arc<T>>, RecvError> {
        if self.cursor < state.head {
            // Lapped by the producer: skip to the oldest surviving entry.
            self.cursor = state.head;
        }
        if self.cursor < state.cursor {
            let offset = (self.cursor - state.head) as usize;
            let value = Arc::clone(&state.buf[offset]);
            self.cursor += 1;
            return Ok(Some(value));
        }
        if state.closed {
            return Ok(None);
        }
        Err(RecvError::Empty)
    }
}

struct RingRecv<'a, T> {
    consumer: &'a mut RingConsumer<T>,
    token: Option<u64>,
}

impl<T: Send + Sync + 'static> Future for RingRecv<'_, T> {
    type Output = Result<Option<Arc<T>>, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if strand::take_current_interrupt() {
            if let Some(token) = this.token.take() {
                let mut state = this.consumer.inner.state.lock();
                state.waiters.retain(|(t, _)| *t != token);
            }
            return Poll::Ready(Err(RecvError::Interrupted));
        }

        let inner = Arc::clone(&this.consumer.inner);
        let mut state = inner.state.lock();
        if let Some(token) = this.token.take() {
            state.waiters.retain(|(t, _)| *t != token);
        }
        match this.consumer.take_next(&state) {
            Err(RecvError::Empty) => {
                let token = state.next_token;
                state.next_token += 1;
                state.waiters.push((token, cx.waker().clone()));
                this.token = Some(token);
                Poll::Pending
            }
            outcome => Poll::Ready(outcome),
        }
    }
}

impl<T> Drop for RingRecv<'_, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut state = self.consumer.inner.state.lock();
            state.waiters.retain(|(t, _)| *t != token);
        }
    }
}
