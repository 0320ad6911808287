//! Request/reply server behavior over an actor.
//!
//! A behavior is a capability bundle, composed rather than inherited: the
//! server actor owns the receive loop, the behavior supplies the handlers.
//! Handlers take `&self` and own their interior mutability, which is what
//! allows a call made from inside the actor's own computation to re-enter
//! the behavior directly instead of deadlocking on its own mailbox.

use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::error::{CallError, JoinError, ReceiveError, SendError};
use crate::runtime::FiberRuntime;
use crate::time;
use crate::types::{ActorId, PanicPayload, RequestId};

use super::correlator::Correlator;
use super::{current_actor, spawn_actor, ActorRef, ExitCause};

/// Handlers for a request/reply server.
pub trait ServerBehavior: Send + Sync + 'static {
    /// Request payload of a `call`.
    type Call: Send + 'static;
    /// Reply payload of a `call`.
    type Reply: Send + 'static;
    /// Payload of a fire-and-forget `cast`.
    type Cast: Send + 'static;

    /// Runs once before the first message.
    fn init(&self) {}

    fn handle_call(&self, request: Self::Call) -> Self::Reply;

    fn handle_cast(&self, msg: Self::Cast);

    /// Runs after the receive loop ends, with the exit cause.
    fn terminate(&self, _cause: &ExitCause) {}
}

/// Wire shape of a server's mailbox; exposed so the underlying
/// [`ActorRef`] stays usable for linking and watching.
pub enum ServerMsg<S: ServerBehavior> {
    Call { id: RequestId, request: S::Call },
    Cast(S::Cast),
}

/// Handle for calling and casting into a server actor.
pub struct ServerRef<S: ServerBehavior> {
    actor: ActorRef<ServerMsg<S>>,
    correlator: Correlator<S::Reply>,
    behavior: Arc<S>,
}

impl<S: ServerBehavior> Clone for ServerRef<S> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            correlator: self.correlator.clone(),
            behavior: Arc::clone(&self.behavior),
        }
    }
}

/// Spawns an actor running the server receive loop for `behavior`.
pub fn spawn_server<S: ServerBehavior>(
    runtime: &FiberRuntime,
    config: ChannelConfig,
    behavior: S,
) -> ServerRef<S> {
    let behavior = Arc::new(behavior);
    let correlator: Correlator<S::Reply> = Correlator::new();

    let loop_behavior = Arc::clone(&behavior);
    let loop_correlator = correlator.clone();
    let actor = spawn_actor(runtime, config, move |mut ctx| async move {
        loop_behavior.init();
        let result = loop {
            match ctx.mailbox.receive().await {
                Ok(ServerMsg::Call { id, request }) => {
                    let reply = loop_behavior.handle_call(request);
                    // False means the caller gave up (timeout or cancel).
                    let _ = loop_correlator.complete(id, reply);
                }
                Ok(ServerMsg::Cast(msg)) => loop_behavior.handle_cast(msg),
                Err(ReceiveError::Closed) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        let cause = match &result {
            Ok(()) => ExitCause::Normal,
            Err(ReceiveError::Interrupted) => ExitCause::Interrupted,
            Err(err) => ExitCause::Failure(Arc::new(PanicPayload::new(err.to_string()))),
        };
        loop_behavior.terminate(&cause);
        loop_correlator.fail_all_pending();
        result.map(|_| ())
    });

    ServerRef {
        actor,
        correlator,
        behavior,
    }
}

impl<S: ServerBehavior> ServerRef<S> {
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// The underlying actor, for linking, watching, or interruption.
    pub fn actor(&self) -> &ActorRef<ServerMsg<S>> {
        &self.actor
    }

    /// Sends a request and suspends until its reply.
    ///
    /// A call from inside this server's own computation bypasses the
    /// mailbox and invokes the handler directly; round-tripping through
    /// the mailbox there would deadlock the actor on itself.
    pub async fn call(&self, request: S::Call) -> Result<S::Reply, CallError> {
        if current_actor() == Some(self.actor.id()) {
            return Ok(self.behavior.handle_call(request));
        }
        let (id, reply) = self.correlator.register();
        if self
            .actor
            .send(ServerMsg::Call { id, request })
            .await
            .is_err()
        {
            return Err(CallError::Stopped);
        }
        reply.await
    }

    /// [`call`](Self::call) with a deadline. On expiry the correlator
    /// entry is removed; a late reply is discarded.
    pub async fn call_timeout(
        &self,
        request: S::Call,
        duration: Duration,
    ) -> Result<S::Reply, CallError> {
        if current_actor() == Some(self.actor.id()) {
            return Ok(self.behavior.handle_call(request));
        }
        let (id, reply) = self.correlator.register();
        if self
            .actor
            .send(ServerMsg::Call { id, request })
            .await
            .is_err()
        {
            return Err(CallError::Stopped);
        }
        match time::timeout(duration, reply).await {
            Ok(outcome) => outcome,
            Err(time::Elapsed) => Err(CallError::Timeout),
        }
    }

    /// Fire-and-forget message. The self-cast bypass mirrors `call`.
    pub async fn cast(&self, msg: S::Cast) -> Result<(), SendError<S::Cast>> {
        if current_actor() == Some(self.actor.id()) {
            self.behavior.handle_cast(msg);
            return Ok(());
        }
        self.actor
            .send(ServerMsg::Cast(msg))
            .await
            .map_err(|e| e.map(into_cast))
    }

    /// Cast with delivery acknowledgement: blocks for mailbox space
    /// regardless of overflow policy.
    pub async fn cast_sync(&self, msg: S::Cast) -> Result<(), SendError<S::Cast>> {
        if current_actor() == Some(self.actor.id()) {
            self.behavior.handle_cast(msg);
            return Ok(());
        }
        self.actor
            .send_sync(ServerMsg::Cast(msg))
            .await
            .map_err(|e| e.map(into_cast))
    }

    /// Stops the server gracefully: the mailbox closes, buffered requests
    /// drain, then the loop exits `Normal`.
    pub fn stop(&self) {
        self.actor.close();
    }

    pub async fn join(&self) -> Result<(), JoinError> {
        self.actor.join().await
    }

    pub fn join_blocking(&self) -> Result<(), JoinError> {
        self.actor.join_blocking()
    }
}

impl<S: ServerBehavior> std::fmt::Debug for ServerRef<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRef")
            .field("id", &self.actor.id())
            .finish_non_exhaustive()
    }
}

fn into_cast<S: ServerBehavior>(msg: ServerMsg<S>) -> S::Cast {
    match msg {
        ServerMsg::Cast(msg) => msg,
        ServerMsg::Call { .. } => unreachable!("cast produced a call message"),
    }
}
