//! Multi-channel receive with atomic waiter arbitration.
//!
//! A select operation registers one waiter against several channels. The
//! arbiter guarantees at most one channel claims the waiter: a readying
//! channel must lease the arbiter before waking, losers leave the waiter
//! alone, and a lease whose condition vanished before delivery is returned
//! so another channel can claim it later.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use smallvec::SmallVec;

use crate::error::RecvError;
use crate::strand;

use super::queue::Channel;

const FREE: u8 = 0;
const LEASED: u8 = 1;
const COMMITTED: u8 = 2;

/// Shared arbitration state for one select attempt.
///
/// The total order on lease attempts is the CAS on `state`: the first
/// channel whose compare-exchange succeeds wins the round, everyone else
/// backs off.
pub(crate) struct SelectArbiter {
    state: AtomicU8,
    index: AtomicUsize,
}

impl SelectArbiter {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            index: AtomicUsize::new(0),
        }
    }

    /// Channel side: claim the waiter for branch `index` before waking it.
    pub(crate) fn try_lease(&self, index: usize) -> bool {
        if self
            .state
            .compare_exchange(FREE, LEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.index.store(index, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Owner side: claim the arbiter directly for an immediately-ready
    /// branch, skipping the wake.
    fn try_claim_direct(&self) -> bool {
        self.state
            .compare_exchange(FREE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Owner side: the leased branch delivered; the round is over.
    fn commit(&self) {
        self.state.store(COMMITTED, Ordering::Release);
    }

    /// Owner side: the leased branch's condition vanished before delivery;
    /// make the waiter claimable again.
    fn return_lease(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    fn leased_index(&self) -> Option<usize> {
        if self.state.load(Ordering::Acquire) == LEASED {
            Some(self.index.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Owner side: start a fresh round. Callers must have deregistered the
    /// waiter from every channel first.
    fn reset(&self) {
        self.state.store(FREE, Ordering::Release);
    }
}

/// Waits for a message on any of `channels`, returning the winning branch
/// index and its receive outcome (`None` is that branch's end-of-stream).
///
/// Fairness is arrival-order, not registration-order: when several branches
/// are ready at once the lowest index wins the immediate scan, but a waiter
/// parked on all branches goes to whichever channel readies first.
pub async fn select_recv<T: Send + 'static>(
    channels: &[&Channel<T>],
) -> Result<(usize, Option<T>), RecvError> {
    assert!(!channels.is_empty(), "select over zero channels");
    SelectFuture {
        channels,
        arbiter: Arc::new(SelectArbiter::new()),
        tokens: SmallVec::new(),
    }
    .await
}

struct SelectFuture<'a, T: Send + 'static> {
    channels: &'a [&'a Channel<T>],
    arbiter: Arc<SelectArbiter>,
    /// Registration token per branch, parallel to `channels`.
    tokens: SmallVec<[Option<u64>; 4]>,
}

impl<T: Send + 'static> SelectFuture<'_, T> {
    fn deregister_all(&mut self) {
        for (channel, token) in self.channels.iter().zip(self.tokens.iter_mut()) {
            if let Some(token) = token.take() {
                channel.deregister_recv_waiter(token);
            }
        }
    }
}

impl<T: Send + 'static> Future for SelectFuture<'_, T> {
    type Output = Result<(usize, Option<T>), RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Stale registrations from the previous poll must go before the
        // arbiter is touched; a channel can only lease through them.
        this.deregister_all();

        if strand::take_current_interrupt() {
            return Poll::Ready(Err(RecvError::Interrupted));
        }

        // A channel leased us and woke this poll: consume from that branch
        // if its condition still holds.
        if let Some(index) = this.arbiter.leased_index() {
            match this.channels[index].poll_select_branch() {
                Some(outcome) => {
                    this.arbiter.commit();
                    return Poll::Ready(outcome.map(|value| (index, value)));
                }
                None => this.arbiter.return_lease(),
            }
        }

        this.arbiter.reset();
        if this.tokens.is_empty() {
            this.tokens.resize(this.channels.len(), None);
        }
        for (index, channel) in this.channels.iter().enumerate() {
            this.tokens[index] =
                Some(channel.register_select_waiter(cx.waker().clone(), &this.arbiter, index));
        }

        // Re-scan after registering so an arrival between the lease check
        // and registration cannot be missed.
        for (index, channel) in this.channels.iter().enumerate() {
            if !channel.is_select_ready() {
                continue;
            }
            if this.arbiter.try_claim_direct() {
                match channel.poll_select_branch() {
                    Some(outcome) => {
                        this.deregister_all();
                        return Poll::Ready(outcome.map(|value| (index, value)));
                    }
                    // Consumed by someone else between peek and take.
                    None => this.arbiter.reset(),
                }
            } else {
                // Another branch leased us concurrently; our waker has
                // already fired, the next poll resolves it.
                return Poll::Pending;
            }
        }

        Poll::Pending
    }
}

impl<T: Send + 'static> Drop for SelectFuture<'_, T> {
    fn drop(&mut self) {
        self.deregister_all();
        // A channel that leased this selector already spent its wake on us.
        // Pass it on so the message does not strand with other receivers
        // still parked.
        if let Some(index) = self.arbiter.leased_index() {
            self.channels[index].notify_receiver_if_ready();
        }
    }
}
