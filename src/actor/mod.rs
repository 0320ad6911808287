//! Actors: fibers paired with owned mailboxes, plus supervision edges.
//!
//! An actor is nothing more than a fiber whose only shared surface is its
//! mailbox. Supervision is message-shaped: linking or watching an actor
//! turns its termination into a [`LifecycleMessage`] enqueued into the
//! observer's mailbox, where it surfaces from `receive` as
//! `ReceiveError::Lifecycle`. Propagating that error out of the actor body
//! with `?` is cascading termination; matching on it is supervision.

mod correlator;
mod events;
mod mailbox;
mod server;

pub use correlator::{Correlator, ReplyFuture};
pub use events::{spawn_event_source, EventHandler, EventSourceRef};
pub use mailbox::Mailbox;
pub use server::{spawn_server, ServerBehavior, ServerMsg, ServerRef};

use std::cell::Cell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;

use crate::channel::{Channel, ChannelConfig};
use crate::error::{JoinError, ReceiveError, SendError};
use crate::runtime::{CatchUnwind, FiberRuntime, StrandHandle};
use crate::types::{ActorId, PanicPayload, WatchToken};

/// Why an actor terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// The actor body returned normally.
    Normal,
    /// The body panicked or failed with an unhandled error.
    Failure(Arc<PanicPayload>),
    /// The actor was interrupted.
    Interrupted,
}

/// Which supervision edge produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleVia {
    /// A symmetric link.
    Link,
    /// A directional watch; the token identifies which registration fired.
    Watch(WatchToken),
}

/// Termination notification delivered through a supervision edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleMessage {
    /// The actor that terminated.
    pub subject: ActorId,
    pub cause: ExitCause,
    pub via: LifecycleVia,
}

/// What actually travels through an actor's mailbox.
#[derive(Debug)]
pub enum Envelope<M> {
    User(M),
    Lifecycle(LifecycleMessage),
}

/// Type-erased delivery target for lifecycle notifications, so supervision
/// edges can cross actors with different message types.
trait LifecycleSink: Send + Sync {
    fn deliver(&self, msg: LifecycleMessage);
}

pub(crate) struct ActorCell<M, R = ()> {
    id: ActorId,
    chan: Channel<Envelope<M>>,
    /// Symmetric link edges, keyed by peer. `Weak`: an edge never keeps a
    /// terminated peer's cell alive.
    links: Mutex<HashMap<ActorId, Weak<dyn LifecycleSink>>>,
    /// Directional watch registrations on *this* actor.
    watchers: Mutex<Vec<(WatchToken, Weak<dyn LifecycleSink>)>>,
    /// Set exactly once, before the supervision edges fire.
    terminated: Mutex<Option<ExitCause>>,
    /// The body's return value, stored on a normal exit and taken by `get`.
    value: Mutex<Option<R>>,
    handle: OnceLock<StrandHandle<()>>,
}

impl<M: Send + 'static, R: Send + 'static> ActorCell<M, R> {
    fn new(config: ChannelConfig) -> Arc<Self> {
        Arc::new(Self {
            id: ActorId::next(),
            chan: Channel::with_config(config),
            links: Mutex::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            terminated: Mutex::new(None),
            value: Mutex::new(None),
            handle: OnceLock::new(),
        })
    }

    /// Runs the termination protocol: record the cause, close the mailbox,
    /// then fire every supervision edge exactly once.
    ///
    /// The cause is recorded before the watcher list is drained; `watch`
    /// takes the watcher lock before reading it, so a concurrent watch
    /// either lands in the drained list or observes the recorded cause and
    /// notifies immediately. Either way no registration is lost.
    fn terminate(self: &Arc<Self>, cause: ExitCause) {
        *self.terminated.lock() = Some(cause.clone());
        self.chan.close();

        let links = std::mem::take(&mut *self.links.lock());
        for (_, peer) in links {
            if let Some(sink) = peer.upgrade() {
                sink.deliver(LifecycleMessage {
                    subject: self.id,
                    cause: cause.clone(),
                    via: LifecycleVia::Link,
                });
            }
        }
        let watchers = std::mem::take(&mut *self.watchers.lock());
        for (token, watcher) in watchers {
            if let Some(sink) = watcher.upgrade() {
                sink.deliver(LifecycleMessage {
                    subject: self.id,
                    cause: cause.clone(),
                    via: LifecycleVia::Watch(token),
                });
            }
        }
    }
}

impl<M: Send + 'static, R: Send + 'static> LifecycleSink for ActorCell<M, R> {
    fn deliver(&self, msg: LifecycleMessage) {
        // Control messages bypass capacity; delivery to a closed mailbox is
        // a no-op (the observer is gone or going).
        let _ = self.chan.force_push(Envelope::Lifecycle(msg));
    }
}

/// Shareable handle to a running actor.
///
/// `R` is the body's return type, retrievable through [`get`](Self::get)
/// once the actor terminates normally.
pub struct ActorRef<M, R = ()> {
    cell: Arc<ActorCell<M, R>>,
}

impl<M, R> Clone for ActorRef<M, R> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<M: Send + 'static, R: Send + 'static> ActorRef<M, R> {
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// Sends a user message, honoring the mailbox's overflow policy.
    pub async fn send(&self, msg: M) -> Result<(), SendError<M>> {
        self.cell
            .chan
            .send(Envelope::User(msg))
            .await
            .map_err(|e| e.map(into_user))
    }

    pub fn try_send(&self, msg: M) -> Result<(), SendError<M>> {
        self.cell
            .chan
            .try_send(Envelope::User(msg))
            .map_err(|e| e.map(into_user))
    }

    /// Sends with delivery acknowledgement: blocks for space regardless of
    /// the mailbox overflow policy and returns once the message is
    /// enqueued.
    pub async fn send_sync(&self, msg: M) -> Result<(), SendError<M>> {
        self.cell
            .chan
            .send_forced(Envelope::User(msg))
            .await
            .map_err(|e| e.map(into_user))
    }

    /// Closes the mailbox for send; the actor drains what is buffered and
    /// then sees `ReceiveError::Closed`.
    pub fn close(&self) {
        self.cell.chan.close();
    }

    /// Requests cooperative interruption of the actor's fiber.
    pub fn interrupt(&self) {
        if let Some(handle) = self.cell.handle.get() {
            handle.interrupt();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.cell.terminated.lock().is_some()
    }

    /// The recorded exit cause, once the actor has terminated.
    pub fn exit_cause(&self) -> Option<ExitCause> {
        self.cell.terminated.lock().clone()
    }

    /// Waits for the actor to terminate.
    pub async fn join(&self) -> Result<(), JoinError> {
        match self.cell.handle.get() {
            Some(handle) => handle.join().await,
            None => Ok(()),
        }
    }

    pub fn join_blocking(&self) -> Result<(), JoinError> {
        crate::strand::block_on(self.join())
    }

    /// Waits for termination and takes the body's return value.
    ///
    /// A failed actor reports `Panicked` with its payload, an interrupted
    /// one `Interrupted`. The value can be taken exactly once; later calls
    /// report [`JoinError::ResultTaken`].
    pub async fn get(&self) -> Result<R, JoinError> {
        self.join().await?;
        self.take_value()
    }

    /// [`get`](Self::get) with a deadline.
    pub async fn get_timeout(&self, duration: Duration) -> Result<R, JoinError> {
        if let Some(handle) = self.cell.handle.get() {
            handle.join_timeout(duration).await?;
        }
        self.take_value()
    }

    /// Blocking variant of [`get`](Self::get) for plain threads.
    pub fn get_blocking(&self) -> Result<R, JoinError> {
        crate::strand::block_on(self.get())
    }

    fn take_value(&self) -> Result<R, JoinError> {
        match self.cell.terminated.lock().clone() {
            Some(ExitCause::Failure(payload)) => return Err(JoinError::Panicked(payload)),
            Some(ExitCause::Interrupted) => return Err(JoinError::Interrupted),
            Some(ExitCause::Normal) | None => {}
        }
        self.cell.value.lock().take().ok_or(JoinError::ResultTaken)
    }

    /// Links this actor and `other` symmetrically: either side's
    /// termination is delivered to the survivor. Linking to an already
    /// terminated actor delivers the notification immediately.
    ///
    /// Each registration is guarded by the registee's own termination
    /// record, read under its link lock. `terminate` records the cause
    /// before draining that lock's map, so a linking racer either lands in
    /// the drained map or observes the cause and delivers on the spot.
    pub fn link<N: Send + 'static, P: Send + 'static>(&self, other: &ActorRef<N, P>) {
        let self_sink: Arc<dyn LifecycleSink> = Arc::clone(&self.cell) as _;
        let other_sink: Arc<dyn LifecycleSink> = Arc::clone(&other.cell) as _;

        // Register self with `other`, so this actor hears of its death.
        {
            let mut links = other.cell.links.lock();
            if let Some(cause) = other.cell.terminated.lock().clone() {
                drop(links);
                self_sink.deliver(LifecycleMessage {
                    subject: other.id(),
                    cause,
                    via: LifecycleVia::Link,
                });
            } else {
                links.insert(self.id(), Arc::downgrade(&self_sink));
            }
        }
        // And the reverse edge.
        {
            let mut links = self.cell.links.lock();
            if let Some(cause) = self.cell.terminated.lock().clone() {
                drop(links);
                other_sink.deliver(LifecycleMessage {
                    subject: self.id(),
                    cause,
                    via: LifecycleVia::Link,
                });
            } else {
                links.insert(other.id(), Arc::downgrade(&other_sink));
            }
        }
    }

    /// Removes the link in both directions.
    pub fn unlink<N: Send + 'static, P: Send + 'static>(&self, other: &ActorRef<N, P>) {
        self.cell.links.lock().remove(&other.id());
        other.cell.links.lock().remove(&self.id());
    }

    /// Watches `subject`: its termination is delivered to this actor's
    /// mailbox tagged with the returned token. Watching an already
    /// terminated actor delivers the notification immediately.
    pub fn watch<N: Send + 'static, P: Send + 'static>(&self, subject: &ActorRef<N, P>) -> WatchToken {
        let token = WatchToken::next();
        let sink: Arc<dyn LifecycleSink> = Arc::clone(&self.cell) as _;
        let mut watchers = subject.cell.watchers.lock();
        if let Some(cause) = subject.cell.terminated.lock().clone() {
            drop(watchers);
            sink.deliver(LifecycleMessage {
                subject: subject.id(),
                cause,
                via: LifecycleVia::Watch(token),
            });
        } else {
            watchers.push((token, Arc::downgrade(&sink)));
        }
        token
    }

    /// Cancels one watch registration; a notification that has not yet
    /// been delivered for it is suppressed.
    pub fn unwatch<N: Send + 'static, P: Send + 'static>(&self, subject: &ActorRef<N, P>, token: WatchToken) {
        subject.cell.watchers.lock().retain(|(t, _)| *t != token);
    }
}

impl<M, R> std::fmt::Debug for ActorRef<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.cell.id)
            .field("terminated", &self.cell.terminated.lock().is_some())
            .finish()
    }
}

fn into_user<M>(envelope: Envelope<M>) -> M {
    match envelope {
        Envelope::User(msg) => msg,
        Envelope::Lifecycle(_) => unreachable!("user send produced a lifecycle envelope"),
    }
}

/// The actor's view of itself, handed to its body.
pub struct ActorContext<M, R = ()> {
    cell: Arc<ActorCell<M, R>>,
    /// The owned receive side; only the actor body ever touches it.
    pub mailbox: Mailbox<M>,
}

impl<M: Send + 'static, R: Send + 'static> ActorContext<M, R> {
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// A shareable handle to this actor, e.g. to link from inside.
    pub fn actor_ref(&self) -> ActorRef<M, R> {
        ActorRef {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Spawns an actor: a fiber running `body` with exclusive ownership of a
/// fresh mailbox.
///
/// The body's outcome fixes the exit cause: `Ok` is `Normal` and stores
/// the returned value for [`ActorRef::get`], a propagated
/// `ReceiveError::Interrupted` is `Interrupted`, any other propagated
/// error or a panic is `Failure`. The cause is then fanned out through
/// the actor's links and watches.
pub fn spawn_actor<M, R, F, Fut>(
    runtime: &FiberRuntime,
    config: ChannelConfig,
    body: F,
) -> ActorRef<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
    F: FnOnce(ActorContext<M, R>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, ReceiveError>> + Send + 'static,
{
    let cell = ActorCell::new(config);
    let ctx = ActorContext {
        cell: Arc::clone(&cell),
        mailbox: Mailbox::new(cell.chan.clone()),
    };
    let fiber_cell = Arc::clone(&cell);
    let wrapper = WithActor::new(cell.id, async move {
        let outcome = CatchUnwind::new(body(ctx)).await;
        let cause = match outcome {
            Ok(Ok(value)) => {
                *fiber_cell.value.lock() = Some(value);
                ExitCause::Normal
            }
            Ok(Err(ReceiveError::Interrupted)) => ExitCause::Interrupted,
            Ok(Err(err)) => ExitCause::Failure(Arc::new(PanicPayload::new(err.to_string()))),
            Err(payload) => ExitCause::Failure(Arc::new(payload)),
        };
        tracing::debug!(actor = %fiber_cell.id, cause = ?cause, "actor terminated");
        fiber_cell.terminate(cause);
    });
    let handle = runtime.spawn(wrapper);
    let _ = cell.handle.set(handle);
    ActorRef { cell }
}

thread_local! {
    static CURRENT_ACTOR: Cell<Option<ActorId>> = const { Cell::new(None) };
}

/// The actor whose body is executing on this thread, if any. Maintained
/// across carrier migration by the actor's poll wrapper.
pub fn current_actor() -> Option<ActorId> {
    CURRENT_ACTOR.with(|c| c.get())
}

/// Future adapter that pins the current-actor marker around every poll of
/// the actor body.
struct WithActor<F> {
    id: ActorId,
    inner: Pin<Box<F>>,
}

impl<F: Future> WithActor<F> {
    fn new(id: ActorId, inner: F) -> Self {
        Self {
            id,
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for WithActor<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        struct Restore(Option<ActorId>);
        impl Drop for Restore {
            fn drop(&mut self) {
                CURRENT_ACTOR.with(|c| c.set(self.0));
            }
        }

        let this = self.get_mut();
        let _restore = Restore(CURRENT_ACTOR.with(|c| c.replace(Some(this.id))));
        this.inner.as_mut().poll(cx)
    }
}
