//! Request/reply correlation.
//!
//! Each outstanding call owns a map entry keyed by a fresh [`RequestId`].
//! The entry is removed on the first matching reply, on timeout (the reply
//! future's drop), or when the responder stops; a reply arriving after
//! removal is dropped and `complete` reports `false`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::CallError;
use crate::strand;
use crate::types::RequestId;

pub struct Correlator<R> {
    inner: Arc<Mutex<HashMap<RequestId, Arc<Mutex<Slot<R>>>>>>,
}

impl<R> Clone for Correlator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Slot<R> {
    Waiting(Option<Waker>),
    Ready(R),
    Stopped,
}

impl<R: Send + 'static> Correlator<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocates a request id and the future that resolves with its reply.
    pub fn register(&self) -> (RequestId, ReplyFuture<R>) {
        let id = RequestId::next();
        let slot = Arc::new(Mutex::new(Slot::Waiting(None)));
        self.inner.lock().insert(id, Arc::clone(&slot));
        (
            id,
            ReplyFuture {
                correlator: self.clone(),
                id: Some(id),
                slot,
            },
        )
    }

    /// Delivers the reply for `id`. Returns `false` if the entry is gone
    /// (already answered, timed out, or cancelled); the value is dropped.
    pub fn complete(&self, id: RequestId, value: R) -> bool {
        let Some(slot) = self.inner.lock().remove(&id) else {
            return false;
        };
        let mut state = slot.lock();
        let waker = match &mut *state {
            Slot::Waiting(waker) => waker.take(),
            // Stopped/Ready can't be observed while the map entry exists.
            _ => None,
        };
        *state = Slot::Ready(value);
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Fails every outstanding request with `Stopped`. Called when the
    /// responder terminates.
    pub fn fail_all_pending(&self) {
        let entries = std::mem::take(&mut *self.inner.lock());
        for (_, slot) in entries {
            let mut state = slot.lock();
            if let Slot::Waiting(waker) = &mut *state {
                let waker = waker.take();
                *state = Slot::Stopped;
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
    }

    /// Outstanding requests with no reply yet.
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<R: Send + 'static> Default for Correlator<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for Correlator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.inner.lock().len())
            .finish()
    }
}

/// Resolves with the reply matched to one request.
///
/// Dropping it cancels the request: the correlator entry is removed and a
/// late reply is discarded.
pub struct ReplyFuture<R> {
    correlator: Correlator<R>,
    /// Present while the map entry may still exist.
    id: Option<RequestId>,
    slot: Arc<Mutex<Slot<R>>>,
}

impl<R: Send + 'static> Future for ReplyFuture<R> {
    type Output = Result<R, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if strand::take_current_interrupt() {
            this.cancel();
            return Poll::Ready(Err(CallError::Interrupted));
        }
        let mut state = this.slot.lock();
        match std::mem::replace(&mut *state, Slot::Stopped) {
            Slot::Ready(value) => {
                this.id = None;
                Poll::Ready(Ok(value))
            }
            Slot::Stopped => {
                this.id = None;
                Poll::Ready(Err(CallError::Stopped))
            }
            Slot::Waiting(_) => {
                *state = Slot::Waiting(Some(cx.waker().clone()));
                Poll::Pending
            }
        }
    }
}

impl<R> ReplyFuture<R> {
    fn cancel(&mut self) {
        if let Some(id) = self.id.take() {
            self.correlator.inner.lock().remove(&id);
        }
    }
}

impl<R> Drop for ReplyFuture<R> {
    fn drop(&mut self) {
        self.cancel();
    }
}
