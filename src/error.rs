//! Error types for the runtime, channels, and actor layer.
//!
//! Error handling follows a small set of rules:
//!
//! - Errors are explicit and typed; no stringly-typed errors.
//! - End-of-stream on a drained, send-closed channel is *not* an error: it is
//!   surfaced as `Ok(None)` from `recv`.
//! - `Timeout` and `Interrupted` are always distinct conditions, on every
//!   operation that can wait.
//! - An uncaught failure inside a fiber terminates only that fiber; it is
//!   retrievable through `join`/`get` and never silently dropped.

use std::sync::Arc;

use thiserror::Error;

use crate::types::PanicPayload;

/// Error returned from channel send operations.
///
/// The undelivered value is handed back to the caller in every variant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel is at capacity and the overflow policy is `Throw`.
    #[error("channel full")]
    Full(T),
    /// The channel is closed for the relevant direction.
    #[error("channel closed")]
    Closed(T),
    /// The sending strand was interrupted while waiting for space.
    #[error("send interrupted")]
    Interrupted(T),
}

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(v) | Self::Closed(v) | Self::Interrupted(v) => v,
        }
    }

    pub(crate) fn map<U>(self, f: impl FnOnce(T) -> U) -> SendError<U> {
        match self {
            Self::Full(v) => SendError::Full(f(v)),
            Self::Closed(v) => SendError::Closed(f(v)),
            Self::Interrupted(v) => SendError::Interrupted(f(v)),
        }
    }
}

/// Error returned from channel receive operations.
///
/// A drained channel that was closed for send is *not* an error; `recv`
/// returns `Ok(None)` for that case.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// No message is currently buffered (`try_recv` only).
    #[error("channel empty")]
    Empty,
    /// The channel was closed for receive; no further receives can succeed.
    #[error("channel closed for receive")]
    Closed,
    /// The deadline elapsed before a message arrived.
    #[error("receive timed out")]
    Timeout,
    /// The receiving strand was interrupted while waiting.
    #[error("receive interrupted")]
    Interrupted,
}

/// Error returned from `StrandHandle::join` and `StrandHandle::get`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The strand terminated with an uncaught panic.
    #[error("strand panicked: {0}")]
    Panicked(Arc<PanicPayload>),
    /// The join deadline elapsed before the strand terminated.
    #[error("join timed out")]
    Timeout,
    /// The joining strand was interrupted while waiting.
    #[error("join interrupted")]
    Interrupted,
    /// The result was already taken by an earlier `get`.
    #[error("strand result already taken")]
    ResultTaken,
}

/// Error returned from `DelayedVal::set`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// The value was already set; single assignment forbids a second `set`.
    #[error("delayed value already set")]
    AlreadySet,
}

/// Error returned from `DelayedVal::get` variants.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
    /// The deadline elapsed before the value was set.
    #[error("get timed out")]
    Timeout,
    /// The waiting strand was interrupted.
    #[error("get interrupted")]
    Interrupted,
}

/// Error returned from mailbox receive operations.
///
/// `Lifecycle` carries a supervision notification from a linked or watched
/// actor; propagating it with `?` out of the actor body is the default
/// cascading-termination behavior, and matching on it instead is how an
/// actor overrides that default.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// The mailbox is closed and drained; no further messages can arrive.
    #[error("mailbox closed")]
    Closed,
    /// The deadline elapsed before a matching message arrived.
    #[error("receive timed out")]
    Timeout,
    /// The actor was interrupted while waiting.
    #[error("receive interrupted")]
    Interrupted,
    /// A linked or watched actor terminated.
    #[error("linked or watched actor terminated")]
    Lifecycle(crate::actor::LifecycleMessage),
}

/// Error returned from request/reply `call` operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// No reply arrived before the deadline; the correlator entry is removed.
    #[error("call timed out")]
    Timeout,
    /// The calling strand was interrupted while waiting for the reply.
    #[error("call interrupted")]
    Interrupted,
    /// The target actor stopped before accepting or replying to the request.
    #[error("call target stopped")]
    Stopped,
}

/// Fatal error reported by the suspension classifier.
///
/// Raised when a callable that was already classified non-suspendable is
/// later required to be suspendable. This is a configuration error and must
/// abort setup rather than leave the stale classification in place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("inconsistent suspension requirement for `{callable}`: {detail}")]
pub struct ClassificationError {
    /// Name of the callable with the conflicting classification.
    pub callable: String,
    /// Human-readable description of the conflict.
    pub detail: String,
}

/// Error returned from `FiberRuntime::spawn_classified`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The entry callable is classified non-suspendable.
    #[error("callable `{0}` is not classified suspendable")]
    NotSuspendable(String),
    /// The callable was never registered with the classifier.
    #[error("callable `{0}` is not registered")]
    Unknown(String),
    /// The runtime is shutting down.
    #[error("runtime is shut down")]
    Shutdown,
}
