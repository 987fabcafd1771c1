//! Per-call stream handles.
//!
//! A [`StreamHandle`] is one side of one in-flight call. It owns an inbound
//! and an outbound [`MessageChannel`] and tracks half-close and terminal state
//! with HTTP/2-style lifecycle rules:
//!
//! - `Open`: both directions may carry messages
//! - `HalfClosedLocal`: we are done sending, the peer may still send
//! - `HalfClosedRemote`: the peer is done sending, we may still send
//! - `Closed`: both directions are done, or the call failed
//!
//! The multiplexer drains the outbound channel into frames and routes inbound
//! frames into the inbound channel. Handles are cheap clones over shared state;
//! dropping the last clone abandons the call (see [`StreamHandle`]).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use rivulet_core::{
    CallShape, Codec, Config, ErrorCode, Frame, Message, RpcError, Side, StreamId,
};

use crate::channel::{MessageChannel, TryPop};
use crate::sched::Outbox;

/// Lifecycle of a call as seen from one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedRemote)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedLocal)
    }

    fn mark_local_eos(&mut self) {
        *self = match *self {
            Self::Open => Self::HalfClosedLocal,
            Self::HalfClosedRemote => Self::Closed,
            other => other,
        };
    }

    fn mark_remote_eos(&mut self) {
        *self = match *self {
            Self::Open => Self::HalfClosedRemote,
            Self::HalfClosedLocal => Self::Closed,
            other => other,
        };
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: StreamState,
    sent: u32,
    received: u32,
    terminal_error: Option<RpcError>,
    half_close_sent: bool,
    error_sent: bool,
    /// The peer already knows the call is over (it sent ERROR, or the
    /// connection is gone). Nothing more is written for this stream.
    quiet: bool,
    /// Nobody will read inbound again; data frames are dropped on arrival.
    discard_inbound: bool,
}

/// Shared state of one call. The multiplexer's stream table holds these
/// directly; applications reach them through [`StreamHandle`].
pub(crate) struct StreamInner {
    id: StreamId,
    shape: CallShape,
    side: Side,
    max_payload_len: u32,
    inbound: MessageChannel,
    outbound: MessageChannel,
    lifecycle: Mutex<Lifecycle>,
    outbox: Arc<Outbox>,
}

impl StreamInner {
    pub(crate) fn new(
        id: StreamId,
        shape: CallShape,
        side: Side,
        config: &Config,
        outbox: Arc<Outbox>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            shape,
            side,
            max_payload_len: config.max_payload_len,
            inbound: MessageChannel::new(config.channel_capacity),
            outbound: MessageChannel::new(config.channel_capacity),
            lifecycle: Mutex::new(Lifecycle::default()),
            outbox,
        })
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    /// Take the next frame this stream wants written: queued data first, then
    /// exactly one terminal frame (ERROR if the call failed locally, HALF_CLOSE
    /// otherwise).
    pub(crate) fn next_outgoing(&self) -> Option<Frame> {
        let mut life = self.lifecycle.lock();
        if life.quiet || life.error_sent {
            return None;
        }
        match self.outbound.try_pop() {
            TryPop::Message(message) => Some(Frame::data(self.id, message.into_payload())),
            TryPop::Empty => None,
            TryPop::Closed(_) => {
                if let Some(err) = life.terminal_error.clone() {
                    life.error_sent = true;
                    Some(Frame::error(self.id, &err, self.max_payload_len))
                } else if !life.half_close_sent {
                    life.half_close_sent = true;
                    Some(Frame::half_close(self.id))
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn has_pending_outgoing(&self) -> bool {
        let life = self.lifecycle.lock();
        self.owes_frame(&life)
    }

    fn owes_frame(&self, life: &Lifecycle) -> bool {
        if life.quiet || life.error_sent {
            return false;
        }
        if !self.outbound.is_empty() {
            return true;
        }
        if life.terminal_error.is_some() {
            return true;
        }
        self.outbound.is_closed() && !life.half_close_sent
    }

    /// Both directions are done and nothing is left to write: the stream can
    /// leave the table.
    pub(crate) fn is_finished(&self) -> bool {
        let life = self.lifecycle.lock();
        life.state == StreamState::Closed && !self.owes_frame(&life)
    }

    /// Route one inbound frame (already known to belong to this stream).
    pub(crate) async fn deliver(&self, frame: Frame) {
        if frame.is_error() {
            let err = RpcError::from_payload(&frame.payload);
            tracing::debug!(stream_id = self.id, %err, "peer failed stream");
            self.abort(err);
            return;
        }

        let half_close = frame.is_half_close();
        let carries_message = frame.flags.is_data() || !frame.payload.is_empty();
        if carries_message {
            let admit = {
                let mut life = self.lifecycle.lock();
                if life.terminal_error.is_some() || life.state == StreamState::Closed {
                    tracing::trace!(stream_id = self.id, "dropping frame for finished stream");
                    return;
                }
                if !life.state.can_receive() {
                    drop(life);
                    self.fail(RpcError::InvalidState(format!(
                        "stream {} received data after half-close",
                        self.id
                    )));
                    return;
                }
                life.received += 1;
                if let Some(limit) = self.shape.recv_limit(self.side) {
                    if life.received > limit {
                        drop(life);
                        self.fail(RpcError::InvalidState(format!(
                            "{} stream {} received more than {limit} message(s)",
                            self.shape, self.id
                        )));
                        return;
                    }
                }
                !life.discard_inbound
            };

            if admit {
                let message = Message::new(self.id, frame.payload);
                // Fails only if the call ended meanwhile; the frame is moot then.
                if let Err(err) = self.inbound.push(message).await {
                    tracing::trace!(stream_id = self.id, %err, "inbound closed during delivery");
                }
            }
        }

        if half_close {
            self.lifecycle.lock().state.mark_remote_eos();
            self.inbound.close();
            tracing::trace!(stream_id = self.id, "peer half-closed");
        }
    }

    /// Fail the call locally: both directions close, suspended operations see
    /// `err`, and the peer is sent an ERROR frame after queued messages.
    fn fail(&self, err: RpcError) {
        let receiving = {
            let mut life = self.lifecycle.lock();
            if life.terminal_error.is_some() || life.state == StreamState::Closed {
                return;
            }
            let receiving = life.state.can_receive();
            life.terminal_error = Some(err.clone());
            life.state = StreamState::Closed;
            receiving
        };
        tracing::debug!(stream_id = self.id, %err, "stream failed");
        self.outbound.fail(err.clone());
        if receiving {
            self.inbound.fail(err);
        }
        self.outbox.mark_ready(self.id);
    }

    /// End the call without telling the peer. Used when the peer reported the
    /// failure itself and when the connection is gone.
    fn abort(&self, err: RpcError) {
        let receiving = {
            let mut life = self.lifecycle.lock();
            if life.terminal_error.is_some() || life.state == StreamState::Closed {
                life.quiet = true;
                return;
            }
            let receiving = life.state.can_receive();
            life.terminal_error = Some(err.clone());
            life.state = StreamState::Closed;
            life.quiet = true;
            receiving
        };
        self.outbound.fail(err.clone());
        self.outbound.discard();
        if receiving {
            self.inbound.fail(err);
        }
    }

    /// Fail the call because its connection is gone.
    pub(crate) fn terminate(&self, err: RpcError) {
        self.abort(err);
    }

    fn close_send(&self) {
        {
            let mut life = self.lifecycle.lock();
            if life.terminal_error.is_some() {
                return;
            }
            // Closed together so the write loop never sees a closed state with
            // an open outbound channel and reaps the stream early.
            life.state.mark_local_eos();
            self.outbound.close();
        }
        self.outbox.mark_ready(self.id);
    }

    fn discard_inbound(&self) {
        self.lifecycle.lock().discard_inbound = true;
        self.inbound.discard();
    }
}

/// Releases the call when the last application clone goes away.
struct Lease(Arc<StreamInner>);

impl Drop for Lease {
    fn drop(&mut self) {
        let inner = &self.0;
        let sending = {
            let life = inner.lifecycle.lock();
            life.terminal_error.is_none() && life.state.can_send()
        };
        if sending {
            tracing::debug!(
                stream_id = inner.id,
                "stream handle dropped while sending, cancelling"
            );
            inner.fail(RpcError::Cancelled);
        } else {
            inner.discard_inbound();
        }
    }
}

/// One side of an in-flight call.
///
/// Clones share the same call, so each direction can be driven from its own
/// task. When the last clone is dropped, a call that can still send is
/// cancelled (the peer sees [`RpcError::Cancelled`]); otherwise whatever the
/// peer still sends is discarded.
#[derive(Clone)]
pub struct StreamHandle {
    lease: Arc<Lease>,
}

impl StreamHandle {
    pub(crate) fn new(inner: Arc<StreamInner>) -> Self {
        Self {
            lease: Arc::new(Lease(inner)),
        }
    }

    fn inner(&self) -> &StreamInner {
        &self.lease.0
    }

    pub fn id(&self) -> StreamId {
        self.inner().id
    }

    pub fn shape(&self) -> CallShape {
        self.inner().shape
    }

    pub fn side(&self) -> Side {
        self.inner().side
    }

    pub fn state(&self) -> StreamState {
        self.inner().lifecycle.lock().state
    }

    pub fn terminal_error(&self) -> Option<RpcError> {
        self.inner().lifecycle.lock().terminal_error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Send one message, suspending while the outbound channel is full.
    ///
    /// The last permitted send of a single-message direction closes that
    /// direction. Sending on a closed direction is [`RpcError::InvalidState`];
    /// sending on a failed call returns its terminal error.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), RpcError> {
        let inner = self.inner();
        let payload = payload.into();
        if payload.len() > inner.max_payload_len as usize {
            return Err(RpcError::status(
                ErrorCode::ResourceExhausted,
                format!(
                    "message of {} bytes exceeds limit of {}",
                    payload.len(),
                    inner.max_payload_len
                ),
            ));
        }

        let last = {
            let mut life = inner.lifecycle.lock();
            if let Some(err) = &life.terminal_error {
                return Err(err.clone());
            }
            let limit = inner.shape.send_limit(inner.side);
            if !life.state.can_send() || limit.is_some_and(|limit| life.sent >= limit) {
                return Err(RpcError::InvalidState(format!(
                    "stream {} cannot send in state {:?}",
                    inner.id, life.state
                )));
            }
            life.sent += 1;
            limit.is_some_and(|limit| life.sent >= limit)
        };

        inner.outbound.push(Message::new(inner.id, payload)).await?;
        if last {
            inner.close_send();
        } else {
            inner.outbox.mark_ready(inner.id);
        }
        Ok(())
    }

    /// Signal that no more messages follow. Idempotent.
    pub fn close_send(&self) {
        self.inner().close_send();
    }

    /// Next inbound message, or `Ok(None)` once the peer half-closed and
    /// everything queued has been read.
    pub async fn recv(&self) -> Result<Option<Message>, RpcError> {
        self.inner().inbound.pop().await
    }

    /// Inbound messages as a stream ending at end-of-stream or with the
    /// terminal error.
    pub fn receive(&self) -> impl Stream<Item = Result<Message, RpcError>> + Send + 'static {
        let handle = self.clone();
        async_stream::try_stream! {
            while let Some(message) = handle.recv().await? {
                yield message;
            }
        }
    }

    /// Exactly one inbound message followed by end-of-stream.
    pub async fn recv_one(&self) -> Result<Message, RpcError> {
        let Some(message) = self.recv().await? else {
            return Err(RpcError::InvalidState(format!(
                "stream {} ended without a message",
                self.id()
            )));
        };
        match self.recv().await? {
            None => Ok(message),
            Some(_) => Err(RpcError::InvalidState(format!(
                "stream {} carried more than one message",
                self.id()
            ))),
        }
    }

    /// Half-close and wait for the single reply, as a client-streaming caller
    /// does once its requests are sent.
    pub async fn close_and_recv(&self) -> Result<Message, RpcError> {
        self.close_send();
        self.recv_one().await
    }

    /// Fail the call with `err`. The first failure wins.
    pub fn fail(&self, err: RpcError) {
        self.inner().fail(err);
    }

    pub fn cancel(&self) {
        self.fail(RpcError::Cancelled);
    }

    pub async fn send_value<C: Codec>(&self, codec: &C, value: &C::Value) -> Result<(), RpcError> {
        let payload = codec.encode(value);
        self.send(payload).await
    }

    /// Receive and decode one message. A decode failure fails the call.
    pub async fn recv_value<C: Codec>(&self, codec: &C) -> Result<Option<C::Value>, RpcError> {
        let Some(message) = self.recv().await? else {
            return Ok(None);
        };
        match codec.decode(message.payload()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id())
            .field("shape", &self.shape())
            .field("side", &self.side())
            .field("state", &self.state())
            .finish()
    }
}
