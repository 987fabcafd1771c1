//! Serving side.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rivulet_core::transport::Transport;
use rivulet_core::{CallShape, Config, RpcError};
use tokio::net::TcpListener;

use crate::dispatch::{CallDispatcher, HandlerRegistry};
use crate::handle::StreamHandle;
use crate::mux::ConnectionMultiplexer;

/// Serves the handlers of one [`HandlerRegistry`] on any number of
/// connections.
///
/// The registry is frozen once the first connection is served; later
/// registrations fail with [`RpcError::InvalidState`].
#[derive(Debug)]
pub struct RpcServer {
    registry: Arc<HandlerRegistry>,
    config: Config,
    serving: AtomicBool,
}

impl RpcServer {
    /// A server with configuration from the environment.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, Config::from_env())
    }

    pub fn with_config(registry: HandlerRegistry, config: Config) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            serving: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

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
        if self.serving.load(Ordering::Acquire) {
            return Err(RpcError::InvalidState(format!(
                "cannot register {name:?}: server is already serving"
            )));
        }
        let Some(registry) = Arc::get_mut(&mut self.registry) else {
            return Err(RpcError::InvalidState(format!(
                "cannot register {name:?}: registry is shared"
            )));
        };
        registry.register(name, shape, handler)
    }

    /// Serve calls arriving on `io` until the peer disconnects.
    pub async fn serve_connection<T: Transport>(&self, io: T) -> Result<(), RpcError> {
        self.serving.store(true, Ordering::Release);
        let dispatcher = CallDispatcher::new(self.registry.clone());
        ConnectionMultiplexer::server(self.config, dispatcher)
            .run(io)
            .await
    }

    /// Accept TCP connections forever, serving each on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        self.serving.store(true, Ordering::Release);
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, handlers = self.registry.len(), "serving");
        }

        loop {
            let (socket, peer) = listener.accept().await?;
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }
            tracing::debug!(%peer, "accepted connection");

            let server = self.clone();
            tokio::spawn(async move {
                match server.serve_connection(socket).await {
                    Ok(()) => tracing::debug!(%peer, "connection closed"),
                    Err(err) => tracing::debug!(%peer, %err, "connection ended with error"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_after_serving_fails() {
        let mut server = RpcServer::with_config(HandlerRegistry::new(), Config::default());
        server
            .register("Ping", CallShape::Unary, |_call| async { Ok(()) })
            .unwrap();

        let (io, peer) = rivulet_core::transport::pair();
        drop(peer);
        server.serve_connection(io).await.unwrap();

        let err = server
            .register("Pong", CallShape::Unary, |_call| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidState(_)));
        assert_eq!(server.registry().names(), vec!["Ping"]);
    }
}
