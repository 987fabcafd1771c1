//! rivulet: a streaming RPC core.
//!
//! Four call shapes share one persistent connection:
//!
//! - unary: one request, one response
//! - server streaming: one request, many responses
//! - client streaming: many requests, one response
//! - bidirectional: many of each, in both directions at once
//!
//! Payloads are opaque bytes; encoding them is the job of a
//! [`Codec`](rivulet_core::Codec) or of the application.
//!
//! # Example
//!
//! ```no_run
//! use rivulet::{CallShape, HandlerRegistry, RpcError, RpcServer, RpcSession};
//!
//! # async fn demo() -> Result<(), RpcError> {
//! let mut registry = HandlerRegistry::new();
//! registry.register("Greet", CallShape::Unary, |call| async move {
//!     let name = call.recv_one().await?;
//!     let reply = format!("Hello {}", String::from_utf8_lossy(name.payload()));
//!     call.send(reply).await
//! })?;
//!
//! let (client_io, server_io) = rivulet::transport::pair();
//! let server = RpcServer::new(registry);
//! tokio::spawn(async move { server.serve_connection(server_io).await });
//!
//! let session = RpcSession::connect(client_io);
//! let reply = session.unary("Greet", "Sekai").await?;
//! assert_eq!(&reply[..], b"Hello Sekai");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod channel;
mod dispatch;
mod handle;
mod mux;
mod sched;
mod server;
mod session;

pub use channel::{MessageChannel, TryPop};
pub use dispatch::{BoxedHandler, CallDispatcher, HandlerFuture, HandlerRegistry};
pub use handle::{StreamHandle, StreamState};
pub use mux::ConnectionMultiplexer;
pub use server::RpcServer;
pub use session::RpcSession;

pub use rivulet_core::transport;
pub use rivulet_core::{
    BytesCodec, CallHeader, CallShape, Codec, Config, ErrorCode, Frame, FrameCodec, FrameFlags,
    Message, RpcError, Side, StreamId, Utf8Codec, WireError,
};
