//! Client-side session.

use std::sync::Arc;

use bytes::Bytes;
use rivulet_core::transport::Transport;
use rivulet_core::{CallShape, Config, ErrorCode, RpcError, StreamId};
use tokio::task::JoinHandle;

use crate::handle::StreamHandle;
use crate::mux::ConnectionMultiplexer;

/// The calling side of one connection.
///
/// Creating a session spawns the connection's multiplexer onto the current
/// tokio runtime. Every call method opens a new stream; calls run
/// concurrently and never interfere with each other. Dropping the session
/// closes the connection.
#[derive(Debug)]
pub struct RpcSession {
    mux: Arc<ConnectionMultiplexer>,
    task: Option<JoinHandle<Result<(), RpcError>>>,
}

impl RpcSession {
    /// Start a session over `io` with configuration from the environment.
    pub fn connect<T: Transport>(io: T) -> Self {
        Self::with_config(io, Config::from_env())
    }

    pub fn with_config<T: Transport>(io: T, config: Config) -> Self {
        let mux = ConnectionMultiplexer::client(config);
        let task = tokio::spawn({
            let mux = mux.clone();
            async move {
                let result = mux.run(io).await;
                if let Err(err) = &result {
                    tracing::debug!(%err, "session connection ended");
                }
                result
            }
        });
        Self {
            mux,
            task: Some(task),
        }
    }

    /// Open a call of any shape. The returned handle is ready to send.
    pub fn open(&self, name: &str, shape: CallShape) -> Result<StreamHandle, RpcError> {
        self.mux.open_stream(name, shape)
    }

    /// One request, one response.
    pub async fn unary(&self, name: &str, request: impl Into<Bytes>) -> Result<Bytes, RpcError> {
        let call = self.open(name, CallShape::Unary)?;
        call.send(request).await?;
        Ok(call.recv_one().await?.into_payload())
    }

    /// One request; read the responses from the returned handle.
    pub async fn server_streaming(
        &self,
        name: &str,
        request: impl Into<Bytes>,
    ) -> Result<StreamHandle, RpcError> {
        let call = self.open(name, CallShape::ServerStreaming)?;
        call.send(request).await?;
        Ok(call)
    }

    /// Send requests on the returned handle, then finish with
    /// [`StreamHandle::close_and_recv`].
    pub fn client_streaming(&self, name: &str) -> Result<StreamHandle, RpcError> {
        self.open(name, CallShape::ClientStreaming)
    }

    pub fn bidirectional(&self, name: &str) -> Result<StreamHandle, RpcError> {
        self.open(name, CallShape::Bidirectional)
    }

    pub fn open_stream_ids(&self) -> Vec<StreamId> {
        self.mux.open_stream_ids()
    }

    pub fn is_closed(&self) -> bool {
        self.mux.is_closed()
    }

    pub fn close(&self) {
        self.mux.close();
    }

    /// Wait for the connection to end and return how it ended.
    pub async fn closed(mut self) -> Result<(), RpcError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(join) => Err(RpcError::status(
                ErrorCode::Internal,
                format!("connection task failed: {join}"),
            )),
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.mux.close();
        }
    }
}
