//! Handler registry and call dispatch.
//!
//! Handlers are registered by name together with the [`CallShape`] they
//! serve. When a call arrives, the dispatcher resolves its header against the
//! registry and runs the handler on its own task, bound to the call's
//! [`StreamHandle`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use rivulet_core::{CallHeader, CallShape, ErrorCode, RpcError};

use crate::handle::StreamHandle;

pub type HandlerFuture = BoxFuture<'static, Result<(), RpcError>>;

/// Type-erased handler. Returning `Ok(())` completes the call; returning an
/// error sends it to the caller as the terminal status.
pub type BoxedHandler = Arc<dyn Fn(StreamHandle) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
struct Registration {
    shape: CallShape,
    handler: BoxedHandler,
}

/// Call name to handler table, filled in before serving starts.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for calls named `name` of the given shape.
    ///
    /// Names are unique; registering one twice is [`RpcError::InvalidState`].
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        shape: CallShape,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(StreamHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RpcError::InvalidState(format!(
                "handler {name:?} is already registered"
            )));
        }
        let handler: BoxedHandler = Arc::new(move |call| handler(call).boxed());
        tracing::debug!(call = %name, %shape, "registered handler");
        self.handlers.insert(name, Registration { shape, handler });
        Ok(())
    }

    pub fn shape_of(&self, name: &str) -> Option<CallShape> {
        self.handlers.get(name).map(|r| r.shape)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Resolves incoming calls and drives their handlers.
#[derive(Clone, Debug)]
pub struct CallDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl CallDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Find the handler for a call, or the error the caller should receive.
    pub fn resolve(&self, header: &CallHeader) -> Result<BoxedHandler, RpcError> {
        let registration = self
            .registry
            .handlers
            .get(&header.name)
            .ok_or_else(|| RpcError::NotFound(header.name.clone()))?;
        if registration.shape != header.shape {
            return Err(RpcError::UnsupportedShape(format!(
                "{} is {}, called as {}",
                header.name, registration.shape, header.shape
            )));
        }
        Ok(registration.handler.clone())
    }

    /// Run `handler` on its own task until the call completes.
    pub fn spawn(&self, handler: BoxedHandler, call: StreamHandle) {
        tokio::spawn(run_handler(handler, call));
    }
}

async fn run_handler(handler: BoxedHandler, call: StreamHandle) {
    let stream_id = call.id();
    let invocation = {
        let call = call.clone();
        async move { handler(call).await }
    };
    // A panicking handler must still end its call, or the caller waits forever.
    let result = AssertUnwindSafe(invocation)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("panic in handler: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("panic in handler: {s}")
            } else {
                "panic in handler".to_string()
            };
            Err(RpcError::status(ErrorCode::Internal, message))
        });

    match result {
        Ok(()) => {
            tracing::trace!(stream_id, "handler completed");
            call.close_send();
        }
        Err(err) => {
            tracing::debug!(stream_id, %err, "handler failed");
            call.fail(err);
        }
    }
}
