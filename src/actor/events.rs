//! Publish/subscribe event source built on the server behavior.
//!
//! Handler registration is a call (the caller learns whether the set
//! changed); `notify` is a cast. Dispatch iterates a snapshot of the
//! handler list, so a handler may add, remove, or re-notify without
//! observing its own mutation mid-dispatch.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelConfig;
use crate::error::{CallError, JoinError, SendError};
use crate::runtime::FiberRuntime;

use super::server::{spawn_server, ServerBehavior, ServerRef};

/// Receives events published through an event source.
pub trait EventHandler<E>: Send + Sync + 'static {
    fn handle(&self, event: &E);
}

/// Registration requests; handlers are identified by pointer.
pub enum HandlerOp<E> {
    Add(Arc<dyn EventHandler<E>>),
    Remove(Arc<dyn EventHandler<E>>),
}

/// The behavior: a handler list plus broadcast dispatch.
pub struct EventSource<E> {
    handlers: Mutex<Vec<Arc<dyn EventHandler<E>>>>,
}

impl<E: Send + 'static> ServerBehavior for EventSource<E> {
    type Call = HandlerOp<E>;
    type Reply = bool;
    type Cast = E;

    fn handle_call(&self, request: HandlerOp<E>) -> bool {
        let mut handlers = self.handlers.lock();
        match request {
            HandlerOp::Add(handler) => {
                if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                    false
                } else {
                    handlers.push(handler);
                    true
                }
            }
            HandlerOp::Remove(handler) => {
                let before = handlers.len();
                handlers.retain(|h| !Arc::ptr_eq(h, &handler));
                handlers.len() != before
            }
        }
    }

    fn handle_cast(&self, event: E) {
        let snapshot = self.handlers.lock().clone();
        for handler in snapshot {
            handler.handle(&event);
        }
    }
}

/// Handle to a running event source.
pub struct EventSourceRef<E: Send + 'static> {
    server: ServerRef<EventSource<E>>,
}

impl<E: Send + 'static> Clone for EventSourceRef<E> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
        }
    }
}

pub fn spawn_event_source<E: Send + 'static>(
    runtime: &FiberRuntime,
    config: ChannelConfig,
) -> EventSourceRef<E> {
    EventSourceRef {
        server: spawn_server(
            runtime,
            config,
            EventSource {
                handlers: Mutex::new(Vec::new()),
            },
        ),
    }
}

impl<E: Send + 'static> EventSourceRef<E> {
    /// Registers a handler. `false` if this exact handler was already
    /// registered.
    pub async fn add_handler(&self, handler: Arc<dyn EventHandler<E>>) -> Result<bool, CallError> {
        self.server.call(HandlerOp::Add(handler)).await
    }

    /// Deregisters a handler. `false` if it was not registered.
    pub async fn remove_handler(
        &self,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<bool, CallError> {
        self.server.call(HandlerOp::Remove(handler)).await
    }

    /// Publishes an event to every currently registered handler.
    /// Fire-and-forget.
    pub async fn notify(&self, event: E) -> Result<(), SendError<E>> {
        self.server.cast(event).await
    }

    pub fn stop(&self) {
        self.server.stop();
    }

    pub fn join_blocking(&self) -> Result<(), JoinError> {
        self.server.join_blocking()
    }
}

impl<E: Send + 'static> std::fmt::Debug for EventSourceRef<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourceRef")
            .field("id", &self.server.id())
            .finish()
    }
}
