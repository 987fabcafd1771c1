#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use rivulet::transport::pair;
use rivulet::{Config, FrameCodec, HandlerRegistry, RpcError, RpcServer, RpcSession};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into()),
            )
            .with_test_writer()
            .init();
    });
}

pub fn test_config() -> Config {
    Config::default()
}

/// A session connected in memory to a server for `registry`.
pub fn connect(registry: HandlerRegistry) -> (RpcSession, JoinHandle<Result<(), RpcError>>) {
    connect_with(registry, test_config(), test_config())
}

pub fn connect_with(
    registry: HandlerRegistry,
    client: Config,
    server: Config,
) -> (RpcSession, JoinHandle<Result<(), RpcError>>) {
    init_tracing();
    let (client_io, server_io) = pair();
    let server = RpcServer::with_config(registry, server);
    let serving = tokio::spawn(async move { server.serve_connection(server_io).await });
    (RpcSession::with_config(client_io, client), serving)
}

pub type RawReader = FramedRead<ReadHalf<DuplexStream>, FrameCodec>;
pub type RawWriter = FramedWrite<WriteHalf<DuplexStream>, FrameCodec>;

/// Frame-level access to one end of a connection.
pub fn raw_peer(io: DuplexStream) -> (RawReader, RawWriter) {
    let max = test_config().max_payload_len;
    let (reader, writer) = tokio::io::split(io);
    (
        FramedRead::new(reader, FrameCodec::new(max)),
        FramedWrite::new(writer, FrameCodec::new(max)),
    )
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
