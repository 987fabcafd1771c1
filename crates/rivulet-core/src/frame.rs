//! Frames and call headers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{CallShape, FrameFlags, RpcError};

/// Identifier of one stream on a connection.
///
/// Client-initiated ids are odd and strictly increasing; even ids are reserved
/// for server-initiated streams, which this core does not use.
pub type StreamId = u32;

/// Size of the fixed frame header: stream id (4), flags (1), payload length (4).
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum length of a call name in an OPEN frame.
pub const MAX_CALL_NAME_LEN: usize = u16::MAX as usize;

/// Smallest unit on the wire: one stream id, control flags and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: StreamId, flags: FrameFlags, payload: Bytes) -> Self {
        Self {
            stream_id,
            flags,
            payload,
        }
    }

    /// A data frame carrying one message.
    pub fn data(stream_id: StreamId, payload: Bytes) -> Self {
        Self::new(stream_id, FrameFlags::empty(), payload)
    }

    /// An OPEN frame announcing a new call.
    pub fn open(stream_id: StreamId, header: &CallHeader) -> Self {
        Self::new(stream_id, FrameFlags::OPEN, header.encode())
    }

    /// An empty HALF_CLOSE frame.
    pub fn half_close(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameFlags::HALF_CLOSE, Bytes::new())
    }

    /// An ERROR frame carrying the terminal status of a stream. The detail is
    /// truncated so the payload stays within `max_payload_len`.
    pub fn error(stream_id: StreamId, err: &RpcError, max_payload_len: u32) -> Self {
        let payload = err.to_payload_within(max_payload_len as usize);
        Self::new(stream_id, FrameFlags::ERROR, payload)
    }

    pub fn is_open(&self) -> bool {
        self.flags.contains(FrameFlags::OPEN)
    }

    pub fn is_half_close(&self) -> bool {
        self.flags.contains(FrameFlags::HALF_CLOSE)
    }

    pub fn is_error(&self) -> bool {
        self.flags.contains(FrameFlags::ERROR)
    }
}

/// Payload of an OPEN frame: `[shape: u8][name_len: u16 LE][name: UTF-8]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHeader {
    pub shape: CallShape,
    pub name: String,
}

impl CallHeader {
    pub fn new(name: impl Into<String>, shape: CallShape) -> Self {
        Self {
            shape,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.name.len());
        buf.put_u8(self.shape as u8);
        buf.put_u16_le(self.name.len() as u16);
        buf.put_slice(self.name.as_bytes());
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, RpcError> {
        if payload.len() < 3 {
            return Err(RpcError::ProtocolViolation(format!(
                "call header too short: {} bytes",
                payload.len()
            )));
        }
        let raw_shape = payload.get_u8();
        let shape = CallShape::from_u8(raw_shape).ok_or_else(|| {
            RpcError::ProtocolViolation(format!("unknown call shape {raw_shape}"))
        })?;
        let name_len = payload.get_u16_le() as usize;
        if payload.len() != name_len {
            return Err(RpcError::ProtocolViolation(format!(
                "call name length {name_len} does not match remaining {} bytes",
                payload.len()
            )));
        }
        let name = std::str::from_utf8(payload)
            .map_err(|_| RpcError::ProtocolViolation("call name is not UTF-8".into()))?
            .to_owned();
        Ok(Self { shape, name })
    }
}
