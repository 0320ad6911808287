//! FIFO queue channel with capacity and overflow policy.
//!
//! One lock guards the buffer, the close flags, and both waiter lists, so
//! every transition (enqueue, dequeue, close) observes and wakes waiters
//! atomically with the state change that readies them. Waiters re-check
//! their condition on poll; a wake is a hint, never a handoff.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{RecvError, SendError};
use crate::strand;
use crate::time;

use super::select::SelectArbiter;
use super::{ChannelConfig, OverflowPolicy};

/// A multi-producer multi-consumer FIFO channel.
///
/// Cloning shares the channel. Close is directional: [`close`](Self::close)
/// stops sends and lets buffered messages drain to an `Ok(None)`
/// end-of-stream; [`close_receive`](Self::close_receive) abandons the
/// buffer and fails both directions immediately.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    state: Mutex<ChanState<T>>,
}

enum WaiterKind {
    Plain,
    Select {
        arbiter: Arc<SelectArbiter>,
        index: usize,
    },
}

struct RecvWaiter {
    token: u64,
    waker: Waker,
    kind: WaiterKind,
}

struct ChanState<T> {
    queue: VecDeque<T>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    send_closed: bool,
    recv_closed: bool,
    next_token: u64,
    recv_waiters: VecDeque<RecvWaiter>,
    send_waiters: VecDeque<(u64, Waker)>,
}

impl<T> ChanState<T> {
    fn alloc_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    fn has_room(&self) -> bool {
        match self.capacity {
            Some(cap) => self.queue.len() < cap,
            None => true,
        }
    }

    /// Wakes the first receive waiter this message can belong to. Select
    /// waiters are only woken after their arbiter is leased; a waiter whose
    /// arbiter is already claimed stays registered and is skipped.
    fn wake_one_receiver(&mut self) {
        let mut skip = 0;
        while skip < self.recv_waiters.len() {
            match &self.recv_waiters[skip].kind {
                WaiterKind::Plain => {
                    if let Some(waiter) = self.recv_waiters.remove(skip) {
                        waiter.waker.wake();
                    }
                    return;
                }
                WaiterKind::Select { arbiter, index } => {
                    if arbiter.try_lease(*index) {
                        if let Some(waiter) = self.recv_waiters.remove(skip) {
                            waiter.waker.wake();
                        }
                        return;
                    }
                    skip += 1;
                }
            }
        }
    }

    fn wake_all_receivers(&mut self) {
        for waiter in self.recv_waiters.drain(..) {
            match waiter.kind {
                WaiterKind::Plain => waiter.waker.wake(),
                WaiterKind::Select { arbiter, index } => {
                    // A failed lease means another branch already woke the
                    // selector; it will observe this channel on re-poll.
                    if arbiter.try_lease(index) {
                        waiter.waker.wake();
                    }
                }
            }
        }
    }

    fn wake_one_sender(&mut self) {
        if let Some((_, waker)) = self.send_waiters.pop_front() {
            waker.wake();
        }
    }

    fn wake_all_senders(&mut self) {
        for (_, waker) in self.send_waiters.drain(..) {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChanState {
                    queue: VecDeque::new(),
                    capacity: config.capacity(),
                    policy: config.policy(),
                    send_closed: false,
                    recv_closed: false,
                    next_token: 0,
                    recv_waiters: VecDeque::new(),
                    send_waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// A bounded channel. Panics if `capacity` is zero.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_config(ChannelConfig::bounded(capacity, policy))
    }

    pub fn unbounded() -> Self {
        Self::with_config(ChannelConfig::unbounded())
    }

    /// Sends a message, suspending under the `Block` policy while full.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        SendFuture {
            chan: self,
            value: Some(value),
            token: None,
            forced: false,
        }
        .await
    }

    /// Sends with `Block` semantics regardless of the configured overflow
    /// policy. Returning `Ok` means the message is in the buffer.
    pub(crate) async fn send_forced(&self, value: T) -> Result<(), SendError<T>> {
        SendFuture {
            chan: self,
            value: Some(value),
            token: None,
            forced: true,
        }
        .await
    }

    /// Non-blocking send. Under `Block`, a full channel reports `Full`
    /// instead of suspending.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.inner.state.lock();
        if state.recv_closed || state.send_closed {
            return Err(SendError::Closed(value));
        }
        if state.has_room() {
            state.queue.push_back(value);
            state.wake_one_receiver();
            return Ok(());
        }
        match state.policy {
            OverflowPolicy::Block | OverflowPolicy::Throw => Err(SendError::Full(value)),
            OverflowPolicy::DropOldest => {
                state.queue.pop_front();
                state.queue.push_back(value);
                state.wake_one_receiver();
                Ok(())
            }
            OverflowPolicy::DropNewest => Ok(()),
        }
    }

    /// Enqueues past capacity. Reserved for control messages that must not
    /// be lost or block the producer.
    pub(crate) fn force_push(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.inner.state.lock();
        if state.recv_closed || state.send_closed {
            return Err(SendError::Closed(value));
        }
        state.queue.push_back(value);
        state.wake_one_receiver();
        Ok(())
    }

    /// Receives the next message, suspending while the channel is empty.
    ///
    /// `Ok(None)` is end-of-stream: the channel was closed for send and
    /// the buffer has drained.
    pub async fn recv(&self) -> Result<Option<T>, RecvError> {
        RecvFuture {
            chan: self,
            token: None,
        }
        .await
    }

    /// [`recv`](Self::recv) with a deadline. A message arriving after the
    /// deadline stays in the channel for the next receiver.
    pub async fn recv_timeout(&self, duration: Duration) -> Result<Option<T>, RecvError> {
        self.recv_deadline(Instant::now() + duration).await
    }

    /// [`recv`](Self::recv) with an absolute deadline.
    pub async fn recv_deadline(&self, deadline: Instant) -> Result<Option<T>, RecvError> {
        let future = RecvFuture {
            chan: self,
            token: None,
        };
        match time::deadline_at(deadline, future).await {
            Ok(outcome) => outcome,
            Err(time::Elapsed) => Err(RecvError::Timeout),
        }
    }

    /// Non-blocking receive. `Err(Empty)` when nothing is buffered but the
    /// channel is still open.
    pub fn try_recv(&self) -> Result<Option<T>, RecvError> {
        let mut state = self.inner.state.lock();
        if state.recv_closed {
            return Err(RecvError::Closed);
        }
        if let Some(value) = state.queue.pop_front() {
            state.wake_one_sender();
            return Ok(Some(value));
        }
        if state.send_closed {
            return Ok(None);
        }
        Err(RecvError::Empty)
    }

    /// Closes the channel for send. Idempotent; buffered messages drain.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.send_closed {
            return;
        }
        state.send_closed = true;
        state.wake_all_receivers();
        state.wake_all_senders();
    }

    /// Closes the channel for receive: further receives fail `Closed`
    /// immediately and buffered messages are discarded.
    pub fn close_receive(&self) {
        let mut state = self.inner.state.lock();
        if state.recv_closed {
            return;
        }
        state.recv_closed = true;
        state.queue.clear();
        state.wake_all_receivers();
        state.wake_all_senders();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed_for_send(&self) -> bool {
        self.inner.state.lock().send_closed
    }

    // Select integration. The registered waiter carries the arbiter so an
    // enqueue can lease it before waking; see `channel::select`.

    pub(crate) fn register_select_waiter(
        &self,
        waker: Waker,
        arbiter: &Arc<SelectArbiter>,
        index: usize,
    ) -> u64 {
        let mut state = self.inner.state.lock();
        let token = state.alloc_token();
        state.recv_waiters.push_back(RecvWaiter {
            token,
            waker,
            kind: WaiterKind::Select {
                arbiter: Arc::clone(arbiter),
                index,
            },
        });
        token
    }

    pub(crate) fn is_select_ready(&self) -> bool {
        let state = self.inner.state.lock();
        state.recv_closed || !state.queue.is_empty() || state.send_closed
    }

    /// One receive attempt on behalf of a select branch. `None` means the
    /// readiness vanished before the selector got here.
    pub(crate) fn poll_select_branch(&self) -> Option<Result<Option<T>, RecvError>> {
        let mut state = self.inner.state.lock();
        if state.recv_closed {
            return Some(Err(RecvError::Closed));
        }
        if let Some(value) = state.queue.pop_front() {
            state.wake_one_sender();
            return Some(Ok(Some(value)));
        }
        if state.send_closed {
            return Some(Ok(None));
        }
        None
    }
}

// Deregistration is called from `Drop` impls, which cannot carry the
// `Send + 'static` bounds of the main block.
impl<T> Channel<T> {
    pub(crate) fn deregister_recv_waiter(&self, token: u64) {
        let mut state = self.inner.state.lock();
        state.recv_waiters.retain(|w| w.token != token);
    }

    fn deregister_send_waiter(&self, token: u64) {
        let mut state = self.inner.state.lock();
        state.send_waiters.retain(|(t, _)| *t != token);
    }

    /// Re-issues a receive wake when the buffer is non-empty. Used when a
    /// woken waiter dies before consuming what readied it.
    pub(crate) fn notify_receiver_if_ready(&self) {
        let mut state = self.inner.state.lock();
        if !state.queue.is_empty() && !state.recv_closed {
            state.wake_one_receiver();
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("len", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("policy", &state.policy)
            .field("send_closed", &state.send_closed)
            .field("recv_closed", &state.recv_closed)
            .finish()
    }
}

struct SendFuture<'a, T> {
    chan: &'a Channel<T>,
    value: Option<T>,
    token: Option<u64>,
    forced: bool,
}

// Holding the pending value makes the future `!Unpin` by default; nothing
// here is address-sensitive, and `poll` moves out of `self`.
impl<T> Unpin for SendFuture<'_, T> {}

impl<T: Send + 'static> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(token) = this.token.take() {
            this.chan.deregister_send_waiter(token);
        }
        let Some(value) = this.value.take() else {
            return Poll::Pending;
        };
        if strand::take_current_interrupt() {
            return Poll::Ready(Err(SendError::Interrupted(value)));
        }

        let mut state = this.chan.inner.state.lock();
        if state.recv_closed || state.send_closed {
            return Poll::Ready(Err(SendError::Closed(value)));
        }
        if state.has_room() {
            state.queue.push_back(value);
            state.wake_one_receiver();
            return Poll::Ready(Ok(()));
        }
        let policy = if this.forced {
            OverflowPolicy::Block
        } else {
            state.policy
        };
        match policy {
            OverflowPolicy::Block => {
                let token = state.alloc_token();
                state.send_waiters.push_back((token, cx.waker().clone()));
                drop(state);
                this.token = Some(token);
                this.value = Some(value);
                Poll::Pending
            }
            OverflowPolicy::DropOldest => {
                state.queue.pop_front();
                state.queue.push_back(value);
                state.wake_one_receiver();
                Poll::Ready(Ok(()))
            }
            OverflowPolicy::DropNewest => Poll::Ready(Ok(())),
            OverflowPolicy::Throw => Poll::Ready(Err(SendError::Full(value))),
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut state = self.chan.inner.state.lock();
            let before = state.send_waiters.len();
            state.send_waiters.retain(|(t, _)| *t != token);
            // A missing token means a receiver already woke this sender.
            // Dying without re-polling would strand the free slot, so the
            // wake passes to the next parked sender.
            if state.send_waiters.len() == before && state.has_room() && !state.send_closed {
                state.wake_one_sender();
            }
        }
    }
}

struct RecvFuture<'a, T> {
    chan: &'a Channel<T>,
    token: Option<u64>,
}

impl<T: Send + 'static> Future for RecvFuture<'_, T> {
    type Output = Result<Option<T>, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(token) = this.token.take() {
            this.chan.deregister_recv_waiter(token);
        }
        if strand::take_current_interrupt() {
            return Poll::Ready(Err(RecvError::Interrupted));
        }

        let mut state = this.chan.inner.state.lock();
        if state.recv_closed {
            return Poll::Ready(Err(RecvError::Closed));
        }
        if let Some(value) = state.queue.pop_front() {
            state.wake_one_sender();
            return Poll::Ready(Ok(Some(value)));
        }
        if state.send_closed {
            return Poll::Ready(Ok(None));
        }
        let token = state.alloc_token();
        state.recv_waiters.push_back(RecvWaiter {
            token,
            waker: cx.waker().clone(),
            kind: WaiterKind::Plain,
        });
        drop(state);
        this.token = Some(token);
        Poll::Pending
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut state = self.chan.inner.state.lock();
            let before = state.recv_waiters.len();
            state.recv_waiters.retain(|w| w.token != token);
            // A missing token means a sender already woke this receiver.
            // Dying without re-polling would strand the buffered message,
            // so the wake passes to the next parked receiver.
            if state.recv_waiters.len() == before && !state.queue.is_empty() && !state.recv_closed
            {
                state.wake_one_receiver();
            }
        }
    }
}
