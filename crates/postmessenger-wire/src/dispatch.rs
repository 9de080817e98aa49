//! Inbound dispatcher: runs the user handler and always replies once.
//!
//! The [`CallHandler`] trait is the single asynchronous contract for inbound
//! calls; synchronous logic is wrapped with [`handler_fn`]. Whatever the
//! handler does (returns a value, returns an error, panics) the remote side
//! receives exactly one reply envelope for the call's id. Failures reply
//! with an empty (`null`) payload.

use crate::host::PostMessage;
use crate::message::{Envelope, HANDSHAKE_ACTION};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Handler for calls issued by the remote side.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    /// Produce the reply payload for `action`.
    ///
    /// `Err(reason)` is logged and answered with an empty payload.
    async fn handle_call(&self, action: &str, data: Value) -> Result<Value, String>;
}

/// Adapter turning a synchronous closure into a [`CallHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> CallHandler for FnHandler<F>
where
    F: Fn(&str, Value) -> Result<Value, String> + Send + Sync + 'static,
{
    async fn handle_call(&self, action: &str, data: Value) -> Result<Value, String> {
        (self.f)(action, data)
    }
}

/// Wrap a synchronous closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn CallHandler>
where
    F: Fn(&str, Value) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// Answers inbound calls on behalf of a channel.
pub struct Dispatcher {
    handler: Option<Arc<dyn CallHandler>>,
    target: Arc<dyn PostMessage>,
    runtime: Handle,
}

impl Dispatcher {
    /// Create a dispatcher replying through `target`, running handlers on `runtime`.
    pub fn new(
        handler: Option<Arc<dyn CallHandler>>,
        target: Arc<dyn PostMessage>,
        runtime: Handle,
    ) -> Self {
        Self {
            handler,
            target,
            runtime,
        }
    }

    /// Whether a user handler is configured.
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Run the call to completion in the background.
    ///
    /// Safe to call from any thread; the work runs on the dispatcher's runtime.
    pub fn dispatch(self: &Arc<Self>, id: String, action: String, data: Value) {
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.respond(id, action, data).await;
        });
    }

    /// Compute the reply for one inbound call, post it, and return it.
    pub async fn respond(&self, id: String, action: String, data: Value) -> Envelope {
        let payload = if action == HANDSHAKE_ACTION {
            debug!(id = %id, "Acknowledging inbound handshake");
            Value::Null
        } else {
            self.run_handler(&id, &action, data).await
        };

        let reply = Envelope::reply(id, payload);
        debug!(id = %reply.id, action = %action, "Sending reply");
        self.target.post_message(reply.clone());
        reply
    }

    async fn run_handler(&self, id: &str, action: &str, data: Value) -> Value {
        let Some(handler) = &self.handler else {
            return Value::Null;
        };

        match AssertUnwindSafe(handler.handle_call(action, data))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(reason)) => {
                warn!(id, action, error = %reason, "Call handler failed, replying empty");
                Value::Null
            }
            Err(_) => {
                warn!(id, action, "Call handler panicked, replying empty");
                Value::Null
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_handler", &self.has_handler())
            .finish()
    }
}
