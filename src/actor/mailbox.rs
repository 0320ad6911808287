//! The actor's owned receive side, with selective receive.
//!
//! `receive_match` scans messages in arrival order and removes only the
//! first one the matcher accepts; rejected messages move to a stash that
//! every later receive consults before the channel, so skipping never
//! reorders what the actor eventually observes. `receive_match_with` lets
//! the handler of a matched message nest further receives on the same
//! mailbox and stash. Lifecycle envelopes are never stashed: they surface
//! immediately as `ReceiveError::Lifecycle`.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::error::{ReceiveError, RecvError};

use super::Envelope;

pub struct Mailbox<M> {
    chan: Channel<Envelope<M>>,
    stash: VecDeque<M>,
}

impl<M: Send + 'static> Mailbox<M> {
    pub(crate) fn new(chan: Channel<Envelope<M>>) -> Self {
        Self {
            chan,
            stash: VecDeque::new(),
        }
    }

    /// Receives the oldest message, stash first.
    pub async fn receive(&mut self) -> Result<M, ReceiveError> {
        if let Some(msg) = self.stash.pop_front() {
            return Ok(msg);
        }
        match self.chan.recv().await {
            Ok(Some(Envelope::User(msg))) => Ok(msg),
            Ok(Some(Envelope::Lifecycle(notice))) => Err(ReceiveError::Lifecycle(notice)),
            Ok(None) => Err(ReceiveError::Closed),
            Err(err) => Err(map_recv(err)),
        }
    }

    /// [`receive`](Self::receive) with a deadline. Expiry is
    /// `ReceiveError::Timeout`, distinct from `Closed`.
    pub async fn receive_timeout(&mut self, duration: Duration) -> Result<M, ReceiveError> {
        if let Some(msg) = self.stash.pop_front() {
            return Ok(msg);
        }
        match self.chan.recv_timeout(duration).await {
            Ok(Some(Envelope::User(msg))) => Ok(msg),
            Ok(Some(Envelope::Lifecycle(notice))) => Err(ReceiveError::Lifecycle(notice)),
            Ok(None) => Err(ReceiveError::Closed),
            Err(err) => Err(map_recv(err)),
        }
    }

    /// Non-blocking receive, stash first.
    pub fn try_receive(&mut self) -> Option<Result<M, ReceiveError>> {
        if let Some(msg) = self.stash.pop_front() {
            return Some(Ok(msg));
        }
        match self.chan.try_recv() {
            Ok(Some(Envelope::User(msg))) => Some(Ok(msg)),
            Ok(Some(Envelope::Lifecycle(notice))) => Some(Err(ReceiveError::Lifecycle(notice))),
            Ok(None) => Some(Err(ReceiveError::Closed)),
            Err(RecvError::Empty) => None,
            Err(err) => Some(Err(map_recv(err))),
        }
    }

    /// Receives the first message the matcher accepts, skipping (and
    /// stashing) the ones it rejects.
    ///
    /// The matcher takes the message by value and hands it back to be
    /// stashed when it does not match.
    pub async fn receive_match<R>(
        &mut self,
        matcher: impl FnMut(M) -> Result<R, M>,
    ) -> Result<R, ReceiveError> {
        self.match_inner(matcher, None).await
    }

    /// Selective receive whose handler runs with mailbox access, so
    /// processing the matched message can perform nested receives against
    /// the same mailbox before the outer receive completes.
    ///
    /// Messages skipped by the outer matcher are already stashed when the
    /// handler runs; nested receives observe them in arrival order.
    pub async fn receive_match_with<'a, P, R, F, Fut>(
        &'a mut self,
        matcher: impl FnMut(M) -> Result<P, M>,
        handler: F,
    ) -> Result<R, ReceiveError>
    where
        F: FnOnce(&'a mut Mailbox<M>, P) -> Fut,
        Fut: Future<Output = Result<R, ReceiveError>> + 'a,
    {
        let picked = self.match_inner(matcher, None).await?;
        handler(self, picked).await
    }

    /// [`receive_match`](Self::receive_match) with a deadline covering the
    /// whole match attempt, however many messages get skipped.
    pub async fn receive_match_timeout<R>(
        &mut self,
        duration: Duration,
        matcher: impl FnMut(M) -> Result<R, M>,
    ) -> Result<R, ReceiveError> {
        self.match_inner(matcher, Some(Instant::now() + duration))
            .await
    }

    async fn match_inner<R>(
        &mut self,
        mut matcher: impl FnMut(M) -> Result<R, M>,
        deadline: Option<Instant>,
    ) -> Result<R, ReceiveError> {
        // Pass over the stash first; it holds the oldest skipped messages.
        let mut index = 0;
        while index < self.stash.len() {
            let Some(candidate) = self.stash.remove(index) else {
                break;
            };
            match matcher(candidate) {
                Ok(matched) => return Ok(matched),
                Err(rejected) => {
                    self.stash.insert(index, rejected);
                    index += 1;
                }
            }
        }
        loop {
            let envelope = match deadline {
                Some(deadline) => self.chan.recv_deadline(deadline).await,
                None => self.chan.recv().await,
            };
            match envelope {
                Ok(Some(Envelope::User(msg))) => match matcher(msg) {
                    Ok(matched) => return Ok(matched),
                    Err(rejected) => self.stash.push_back(rejected),
                },
                Ok(Some(Envelope::Lifecycle(notice))) => {
                    return Err(ReceiveError::Lifecycle(notice))
                }
                Ok(None) => return Err(ReceiveError::Closed),
                Err(err) => return Err(map_recv(err)),
            }
        }
    }

    /// Messages skipped by matchers and not yet re-consumed.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("stashed", &self.stash.len())
            .finish_non_exhaustive()
    }
}

fn map_recv(err: RecvError) -> ReceiveError {
    match err {
        RecvError::Timeout => ReceiveError::Timeout,
        RecvError::Interrupted => ReceiveError::Interrupted,
        RecvError::Closed | RecvError::Empty => ReceiveError::Closed,
    }
}
