//! Frame codec for byte-stream transports.
//!
//! Each frame is a 9-byte little-endian header followed by the payload:
//!
//! ```text
//! ┌──────────────┬───────────┬─────────────────┬─────────────────┐
//! │ stream_id u32│ flags u8  │ payload_len u32 │ payload ...     │
//! └──────────────┴───────────┴─────────────────┴─────────────────┘
//! ```
//!
//! Flags outside [`FrameFlags::all`] and payloads above the configured limit are
//! rejected while decoding; both are fatal to the connection.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{FRAME_HEADER_LEN, Frame, FrameFlags, WireError};

/// Encoder/decoder for [`Frame`]s, used with `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_len: u32,
}

impl FrameCodec {
    pub fn new(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }

    pub fn max_payload_len(&self) -> u32 {
        self.max_payload_len
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if src.len() < FRAME_HEADER_LEN {
            src.reserve(FRAME_HEADER_LEN - src.len());
            return Ok(None);
        }

        let mut header = &src[..FRAME_HEADER_LEN];
        let stream_id = header.get_u32_le();
        let raw_flags = header.get_u8();
        let payload_len = header.get_u32_le();

        let flags = FrameFlags::from_bits(raw_flags).ok_or(WireError::UnknownFlags(raw_flags))?;
        if payload_len > self.max_payload_len {
            return Err(WireError::PayloadTooLarge {
                len: payload_len as usize,
                max: self.max_payload_len,
            });
        }

        let frame_len = FRAME_HEADER_LEN + payload_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(payload_len as usize).freeze();
        Ok(Some(Frame {
            stream_id,
            flags,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let len = frame.payload.len();
        if len > self.max_payload_len as usize {
            return Err(WireError::PayloadTooLarge {
                len,
                max: self.max_payload_len,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + len);
        dst.put_u32_le(frame.stream_id);
        dst.put_u8(frame.flags.bits());
        dst.put_u32_le(len as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
