//! Single-assignment dataflow value.
//!
//! [`DelayedVal`] is settable exactly once and readable by any number of
//! strands, fiber- or thread-backed alike. `get` before `set` suspends the
//! caller; `set` releases every waiter exactly once, and every successful
//! `get`, whether it ran before or after the assignment and from any strand
//! kind, observes the identical value.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{GetError, SetError};
use crate::strand;
use crate::time;

struct DvState<T> {
    value: Option<T>,
    next_token: u64,
    waiters: SmallVec<[(u64, Waker); 4]>,
}

struct DvShared<T> {
    state: Mutex<DvState<T>>,
}

/// A value assigned at most once and broadcast to all waiters.
///
/// Clones share the same underlying cell.
pub struct DelayedVal<T> {
    shared: Arc<DvShared<T>>,
}

impl<T> Clone for DelayedVal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for DelayedVal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedVal")
            .field("is_done", &self.is_done())
            .finish()
    }
}

impl<T> Default for DelayedVal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayedVal<T> {
    /// Creates an unset value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DvShared {
                state: Mutex::new(DvState {
                    value: None,
                    next_token: 1,
                    waiters: SmallVec::new(),
                }),
            }),
        }
    }

    /// Assigns the value, releasing all current waiters.
    ///
    /// A second `set` fails with [`SetError::AlreadySet`] and leaves the
    /// stored value untouched.
    pub fn set(&self, value: T) -> Result<(), SetError> {
        let waiters = {
            let mut state = self.shared.state.lock();
            if state.value.is_some() {
                return Err(SetError::AlreadySet);
            }
            state.value = Some(value);
            std::mem::take(&mut state.waiters)
        };
        for (_, waker) in waiters {
            waker.wake();
        }
        Ok(())
    }

    /// Whether the value has been assigned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().value.is_some()
    }
}

impl<T: Clone + Send + 'static> DelayedVal<T> {
    /// Returns the value without waiting, if already set.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.shared.state.lock().value.clone()
    }

    /// Waits for the value.
    ///
    /// Suspends the calling strand while unset; every waiter released by
    /// `set` observes the identical value. Fails only on interruption.
    #[must_use]
    pub fn get(&self) -> GetFuture<T> {
        GetFuture {
            shared: Arc::clone(&self.shared),
            token: None,
        }
    }

    /// Waits for the value with a deadline.
    pub async fn get_timeout(&self, duration: Duration) -> Result<T, GetError> {
        self.get_deadline(Instant::now() + duration).await
    }

    /// Waits for the value until an absolute deadline.
    pub async fn get_deadline(&self, deadline: Instant) -> Result<T, GetError> {
        match time::deadline_at(deadline, self.get()).await {
            Ok(result) => result,
            Err(time::Elapsed) => Err(GetError::Timeout),
        }
    }

    /// Waits for the value from a plain OS thread.
    pub fn get_blocking(&self) -> Result<T, GetError> {
        strand::block_on(self.get())
    }
}

/// Future returned by [`DelayedVal::get`].
pub struct GetFuture<T> {
    shared: Arc<DvShared<T>>,
    token: Option<u64>,
}

impl<T: Clone> Future for GetFuture<T> {
    type Output = Result<T, GetError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();
        if let Some(value) = state.value.as_ref() {
            let value = value.clone();
            if let Some(token) = this.token.take() {
                state.waiters.retain(|(t, _)| *t != token);
            }
            return Poll::Ready(Ok(value));
        }
        if strand::take_current_interrupt() {
            if let Some(token) = this.token.take() {
                state.waiters.retain(|(t, _)| *t != token);
            }
            return Poll::Ready(Err(GetError::Interrupted));
        }
        // Refresh our registration with the current waker.
        if let Some(token) = this.token {
            state.waiters.retain(|(t, _)| *t != token);
        }
        let token = state.next_token;
        state.next_token += 1;
        state.waiters.push((token, cx.waker().clone()));
        this.token = Some(token);
        Poll::Pending
    }
}

impl<T> Drop for GetFuture<T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut state = self.shared.state.lock();
            state.waiters.retain(|(t, _)| *t != token);
        }
    }
}
