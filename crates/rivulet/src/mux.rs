//! Connection multiplexer.
//!
//! One [`ConnectionMultiplexer`] owns one physical connection. Its read loop
//! decodes frames and routes them to the stream they name; its write loop
//! drains control frames first and then serves streams with pending output in
//! round-robin order, one frame per turn.
//!
//! Stream ids are odd and allocated by the client side (1, 3, 5, ...), never
//! reused within a connection. Anything the peer sends that breaks the framing
//! rules is a protocol violation and ends the connection; every open call then
//! fails with [`RpcError::ConnectionLost`].
//!
//! The read loop waits for room when a stream's inbound channel is full, and
//! reads nothing else meanwhile. A call whose receiver stops reading therefore
//! stalls every other call on the connection until it reads again or ends.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rivulet_core::transport::Transport;
use rivulet_core::{
    CallHeader, CallShape, Config, ErrorCode, Frame, FrameCodec, RpcError, Side, StreamId,
    MAX_CALL_NAME_LEN,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::dispatch::CallDispatcher;
use crate::handle::{StreamHandle, StreamInner};
use crate::sched::{Outbox, Work};

/// Live streams of one connection.
#[derive(Default)]
struct StreamTable {
    streams: HashMap<StreamId, Arc<StreamInner>>,
    /// Next id a client hands out. Kept wide so exhaustion is detectable.
    next_local_id: u64,
    /// Highest id the peer has opened (server side).
    last_remote_id: StreamId,
    closed: bool,
}

impl StreamTable {
    /// An odd id that was in use earlier on this connection and has been
    /// retired since. Frames for such ids are late and get dropped.
    fn is_retired(&self, role: Side, id: StreamId) -> bool {
        id % 2 == 1
            && match role {
                Side::Client => u64::from(id) < self.next_local_id,
                Side::Server => id <= self.last_remote_id,
            }
    }
}

fn violation(detail: String) -> RpcError {
    RpcError::ProtocolViolation(detail)
}

pub struct ConnectionMultiplexer {
    role: Side,
    config: Config,
    table: Mutex<StreamTable>,
    outbox: Arc<Outbox>,
    dispatcher: Option<CallDispatcher>,
    shutdown: CancellationToken,
}

impl ConnectionMultiplexer {
    /// A multiplexer for the calling side of a connection.
    pub fn client(config: Config) -> Arc<Self> {
        Self::new(Side::Client, config, None)
    }

    /// A multiplexer for the serving side; accepted calls go to `dispatcher`.
    pub fn server(config: Config, dispatcher: CallDispatcher) -> Arc<Self> {
        Self::new(Side::Server, config, Some(dispatcher))
    }

    fn new(role: Side, config: Config, dispatcher: Option<CallDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            role,
            config,
            table: Mutex::new(StreamTable {
                next_local_id: 1,
                ..Default::default()
            }),
            outbox: Arc::new(Outbox::new()),
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn role(&self) -> Side {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a new call. The OPEN frame is queued before the handle is
    /// returned, so the caller may send right away.
    pub fn open_stream(&self, name: &str, shape: CallShape) -> Result<StreamHandle, RpcError> {
        if self.role != Side::Client {
            return Err(RpcError::InvalidState(
                "only the client side of a connection opens streams".into(),
            ));
        }
        let header = CallHeader::new(name, shape);
        if name.len() > MAX_CALL_NAME_LEN || 3 + name.len() > self.config.max_payload_len as usize
        {
            return Err(RpcError::status(
                ErrorCode::InvalidArgument,
                format!("call name of {} bytes is too long", name.len()),
            ));
        }

        let mut table = self.table.lock();
        if table.closed {
            return Err(RpcError::ConnectionLost);
        }
        if table.streams.len() >= self.config.max_concurrent_streams {
            return Err(RpcError::status(
                ErrorCode::ResourceExhausted,
                format!(
                    "{} streams already open on this connection",
                    table.streams.len()
                ),
            ));
        }
        let Ok(id) = StreamId::try_from(table.next_local_id) else {
            return Err(RpcError::status(
                ErrorCode::ResourceExhausted,
                "stream ids exhausted on this connection",
            ));
        };
        table.next_local_id += 2;

        let inner = StreamInner::new(id, shape, Side::Client, &self.config, self.outbox.clone());
        table.streams.insert(id, inner.clone());
        // Queued under the table lock so OPEN frames leave in id order.
        self.outbox.push_control(Frame::open(id, &header));
        drop(table);

        tracing::debug!(stream_id = id, call = %name, %shape, "opened stream");
        Ok(StreamHandle::new(inner))
    }

    /// Ids of the streams currently in the table, sorted.
    pub fn open_stream_ids(&self) -> Vec<StreamId> {
        let table = self.table.lock();
        let mut ids: Vec<StreamId> = table.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Shut the connection down. `run` returns and open calls fail with
    /// [`RpcError::ConnectionLost`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Drive the connection until the peer disconnects, the connection fails
    /// or [`close`](Self::close) is called.
    ///
    /// Returns `Ok(())` on an orderly end, [`RpcError::ConnectionLost`] on an
    /// I/O failure and [`RpcError::ProtocolViolation`] when the peer broke the
    /// framing rules.
    pub async fn run<T: Transport>(self: Arc<Self>, io: T) -> Result<(), RpcError> {
        tracing::debug!(role = ?self.role, "multiplexer started");
        let (reader, writer) = tokio::io::split(io);
        let mut frames_in = FramedRead::new(reader, FrameCodec::new(self.config.max_payload_len));
        let frames_out = FramedWrite::new(writer, FrameCodec::new(self.config.max_payload_len));

        let result = tokio::select! {
            result = self.read_loop(&mut frames_in) => result,
            result = self.write_loop(frames_out) => result,
            _ = self.shutdown.cancelled() => {
                tracing::debug!(role = ?self.role, "multiplexer closed locally");
                Ok(())
            }
        };

        self.teardown();
        result
    }

    async fn read_loop<R>(&self, frames: &mut FramedRead<R, FrameCodec>) -> Result<(), RpcError>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| {
                tracing::debug!(error = %e, "failed to read frame");
                RpcError::from(e)
            })?;
            tracing::trace!(
                stream_id = frame.stream_id,
                flags = ?frame.flags,
                payload_len = frame.payload.len(),
                "received frame"
            );
            if let Err(err) = self.route(frame).await {
                tracing::warn!(%err, "closing connection");
                return Err(err);
            }
        }
        tracing::debug!(role = ?self.role, "connection closed by peer");
        Ok(())
    }

    async fn route(&self, frame: Frame) -> Result<(), RpcError> {
        if frame.is_open() {
            return self.accept(frame).await;
        }

        let id = frame.stream_id;
        let stream = {
            let table = self.table.lock();
            match table.streams.get(&id) {
                Some(stream) => Some(stream.clone()),
                None if table.is_retired(self.role, id) => None,
                None => return Err(violation(format!("frame for unknown stream {id}"))),
            }
        };

        match stream {
            Some(stream) => {
                stream.deliver(frame).await;
                self.reap(&stream);
            }
            None => tracing::trace!(stream_id = id, flags = ?frame.flags, "dropping late frame"),
        }
        Ok(())
    }

    /// Handle an OPEN frame: validate it, then either start the call or reject
    /// it with an ERROR frame.
    async fn accept(&self, frame: Frame) -> Result<(), RpcError> {
        let id = frame.stream_id;
        let dispatcher = match (&self.dispatcher, self.role) {
            (Some(dispatcher), Side::Server) => dispatcher,
            _ => return Err(violation(format!("OPEN for stream {id} sent to the client side"))),
        };
        if frame.is_error() {
            return Err(violation(format!("OPEN combined with ERROR on stream {id}")));
        }
        if id % 2 == 0 {
            return Err(violation(format!("OPEN on server-initiated stream {id}")));
        }
        let header = CallHeader::decode(&frame.payload)?;

        let accepted = {
            let mut table = self.table.lock();
            if id <= table.last_remote_id {
                return Err(violation(format!(
                    "OPEN for stream {id} after stream {}",
                    table.last_remote_id
                )));
            }
            table.last_remote_id = id;

            if table.streams.len() >= self.config.max_concurrent_streams {
                let err = RpcError::status(
                    ErrorCode::ResourceExhausted,
                    format!("{} streams already open on this connection", table.streams.len()),
                );
                self.reject(id, &err);
                None
            } else {
                match dispatcher.resolve(&header) {
                    Ok(handler) => {
                        let inner = StreamInner::new(
                            id,
                            header.shape,
                            Side::Server,
                            &self.config,
                            self.outbox.clone(),
                        );
                        table.streams.insert(id, inner.clone());
                        Some((inner, handler))
                    }
                    Err(err) => {
                        self.reject(id, &err);
                        None
                    }
                }
            }
        };

        let Some((inner, handler)) = accepted else {
            tracing::debug!(stream_id = id, call = %header.name, "rejected call");
            return Ok(());
        };

        tracing::debug!(
            stream_id = id,
            call = %header.name,
            shape = %header.shape,
            "accepted call"
        );
        if frame.is_half_close() {
            inner.deliver(Frame::half_close(id)).await;
        }
        dispatcher.spawn(handler, StreamHandle::new(inner));
        Ok(())
    }

    fn reject(&self, id: StreamId, err: &RpcError) {
        let frame = Frame::error(id, err, self.config.max_payload_len);
        self.outbox.push_control(frame);
    }

    async fn write_loop<W>(&self, mut frames: FramedWrite<W, FrameCodec>) -> Result<(), RpcError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(work) = self.outbox.next().await {
            let frame = match work {
                Work::Control(frame) => Some(frame),
                Work::Stream(id) => {
                    let stream = self.table.lock().streams.get(&id).cloned();
                    stream.and_then(|stream| {
                        let frame = stream.next_outgoing();
                        if stream.has_pending_outgoing() {
                            self.outbox.mark_ready(id);
                        } else {
                            self.reap(&stream);
                        }
                        frame
                    })
                }
            };

            if let Some(frame) = frame {
                tracing::trace!(
                    stream_id = frame.stream_id,
                    flags = ?frame.flags,
                    payload_len = frame.payload.len(),
                    "writing frame"
                );
                frames.feed(frame).await?;
            }
            if self.outbox.is_idle() {
                frames.flush().await?;
            }
        }
        Ok(())
    }

    /// Drop a stream from the table once it has nothing left to do.
    fn reap(&self, stream: &StreamInner) {
        if !stream.is_finished() {
            return;
        }
        if self.table.lock().streams.remove(&stream.id()).is_some() {
            tracing::trace!(stream_id = stream.id(), "stream retired");
        }
    }

    fn teardown(&self) {
        let streams: Vec<Arc<StreamInner>> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.streams.drain().map(|(_, stream)| stream).collect()
        };
        self.outbox.close();
        self.shutdown.cancel();
        if !streams.is_empty() {
            tracing::debug!(open_streams = streams.len(), "failing streams of closed connection");
        }
        for stream in streams {
            stream.terminate(RpcError::ConnectionLost);
        }
    }
}

impl std::fmt::Debug for ConnectionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMultiplexer")
            .field("role", &self.role)
            .field("open_streams", &self.open_stream_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::HandlerRegistry;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_client_ids_are_odd_and_increasing() {
        let mux = ConnectionMultiplexer::client(Config::default());
        let a = mux.open_stream("A", CallShape::Bidirectional).unwrap();
        let b = mux.open_stream("B", CallShape::Bidirectional).unwrap();
        let c = mux.open_stream("C", CallShape::Bidirectional).unwrap();
        assert_eq!((a.id(), b.id(), c.id()), (1, 3, 5));
        assert_eq!(mux.open_stream_ids(), vec![1, 3, 5]);
    }

    #[test]
    fn test_server_cannot_open_streams() {
        let dispatcher = CallDispatcher::new(Arc::new(HandlerRegistry::new()));
        let mux = ConnectionMultiplexer::server(Config::default(), dispatcher);
        assert!(matches!(
            mux.open_stream("A", CallShape::Unary),
            Err(RpcError::InvalidState(_))
        ));
    }

    #[test]
    fn test_stream_limit() {
        let mux = ConnectionMultiplexer::client(Config::default().with_max_concurrent_streams(2));
        let _a = mux.open_stream("A", CallShape::Bidirectional).unwrap();
        let _b = mux.open_stream("B", CallShape::Bidirectional).unwrap();
        let err = mux.open_stream("C", CallShape::Bidirectional).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    }

    #[test]
    fn test_retired_ids() {
        let table = StreamTable {
            next_local_id: 7,
            last_remote_id: 9,
            ..Default::default()
        };
        assert!(table.is_retired(Side::Client, 5));
        assert!(!table.is_retired(Side::Client, 7));
        assert!(!table.is_retired(Side::Client, 4));
        assert!(table.is_retired(Side::Server, 9));
        assert!(!table.is_retired(Side::Server, 11));
    }

    #[tokio::test]
    async fn test_write_loop_round_robin() {
        let (io, peer) = rivulet_core::transport::pair();
        let mux = ConnectionMultiplexer::client(Config::default());

        let large = mux.open_stream("Large", CallShape::Bidirectional).unwrap();
        let small = mux.open_stream("Small", CallShape::Unary).unwrap();
        for i in 0..10 {
            large.send(format!("L{i}")).await.unwrap();
        }
        small.send("S").await.unwrap();

        tokio::spawn(mux.clone().run(io));
        let mut frames = FramedRead::new(peer, FrameCodec::new(Config::default().max_payload_len));
        let mut written = Vec::new();
        for _ in 0..14 {
            let frame = tokio::time::timeout(WAIT, frames.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            written.push(match (frame.is_open(), frame.is_half_close()) {
                (true, _) => format!("open:{}", frame.stream_id),
                (_, true) => format!("close:{}", frame.stream_id),
                _ => String::from_utf8_lossy(&frame.payload).into_owned(),
            });
        }

        let expected = [
            "open:1", "open:3", "L0", "S", "L1", "close:3", "L2", "L3", "L4", "L5", "L6", "L7",
            "L8", "L9",
        ];
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_close_fails_open_streams() {
        let (io, _peer) = rivulet_core::transport::pair();
        let mux = ConnectionMultiplexer::client(Config::default());
        let call = mux.open_stream("A", CallShape::Bidirectional).unwrap();

        let run = tokio::spawn(mux.clone().run(io));
        mux.close();
        let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
        assert_eq!(result, Ok(()));

        assert_eq!(call.recv().await, Err(RpcError::ConnectionLost));
        assert_eq!(call.terminal_error(), Some(RpcError::ConnectionLost));
        assert!(mux.is_closed());
        assert_eq!(
            mux.open_stream("B", CallShape::Unary).unwrap_err(),
            RpcError::ConnectionLost
        );
    }
}
