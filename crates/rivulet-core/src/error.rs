//! Error codes and error types.

use core::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Code and detail length that precede the detail in an ERROR payload.
pub const ERROR_PAYLOAD_HEADER_LEN: usize = 8;

/// Status codes carried by ERROR frames.
///
/// Codes 0-99 align with gRPC for familiarity.
/// Codes 100+ are specific to the streaming core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    // gRPC-aligned (0-99)
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    NotFound = 5,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,

    // core-specific (100+)
    ChannelClosed = 100,
    InvalidState = 101,
    UnsupportedShape = 102,
    ProtocolViolation = 103,
    ConnectionLost = 104,
    DecodeError = 105,
}

impl ErrorCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Cancelled),
            2 => Some(Self::Unknown),
            3 => Some(Self::InvalidArgument),
            5 => Some(Self::NotFound),
            7 => Some(Self::PermissionDenied),
            8 => Some(Self::ResourceExhausted),
            9 => Some(Self::FailedPrecondition),
            10 => Some(Self::Aborted),
            12 => Some(Self::Unimplemented),
            13 => Some(Self::Internal),
            14 => Some(Self::Unavailable),
            100 => Some(Self::ChannelClosed),
            101 => Some(Self::InvalidState),
            102 => Some(Self::UnsupportedShape),
            103 => Some(Self::ProtocolViolation),
            104 => Some(Self::ConnectionLost),
            105 => Some(Self::DecodeError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::ResourceExhausted => write!(f, "resource exhausted"),
            Self::FailedPrecondition => write!(f, "failed precondition"),
            Self::Aborted => write!(f, "aborted"),
            Self::Unimplemented => write!(f, "unimplemented"),
            Self::Internal => write!(f, "internal error"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::UnsupportedShape => write!(f, "unsupported shape"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::DecodeError => write!(f, "decode error"),
        }
    }
}

/// Errors surfaced by calls, streams and connections.
///
/// Per-call errors terminate one stream and reach both peers as the terminal
/// status. `ProtocolViolation` and `ConnectionLost` are connection-level: every
/// open call on the connection fails with `ConnectionLost`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Push into a closed channel. The caller must stop sending.
    #[error("channel closed")]
    ChannelClosed,

    /// The operation violates the stream state machine.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No handler is registered under the requested name.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handler and the caller disagree on the call shape.
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),

    /// Malformed frame or illegal flag combination.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The underlying connection failed or was closed.
    #[error("connection lost")]
    ConnectionLost,

    /// The codec could not decode a message payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// The call was cancelled by either end.
    #[error("cancelled")]
    Cancelled,

    /// Application status returned by a handler.
    #[error("{code}: {message}")]
    Status { code: ErrorCode, message: String },
}

impl RpcError {
    /// Shorthand for an application status error.
    pub fn status(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// The wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ChannelClosed => ErrorCode::ChannelClosed,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::UnsupportedShape(_) => ErrorCode::UnsupportedShape,
            Self::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            Self::ConnectionLost => ErrorCode::ConnectionLost,
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Status { code, .. } => *code,
        }
    }

    /// True for errors that fail the whole connection rather than one call.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::ConnectionLost)
    }

    fn detail(&self) -> &str {
        match self {
            Self::InvalidState(d)
            | Self::NotFound(d)
            | Self::UnsupportedShape(d)
            | Self::ProtocolViolation(d)
            | Self::Decode(d) => d,
            Self::Status { message, .. } => message,
            Self::ChannelClosed | Self::ConnectionLost | Self::Cancelled => "",
        }
    }

    /// Encode as an ERROR frame payload: `[code: u32][len: u32][detail]`, little-endian.
    pub fn to_payload(&self) -> Bytes {
        self.to_payload_within(usize::MAX)
    }

    /// Like [`to_payload`](Self::to_payload), but the detail is cut at a UTF-8
    /// boundary so the whole payload fits in `max_len` bytes.
    pub fn to_payload_within(&self, max_len: usize) -> Bytes {
        let mut detail = self.detail();
        let room = max_len.saturating_sub(ERROR_PAYLOAD_HEADER_LEN);
        if detail.len() > room {
            let mut end = room;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            detail = &detail[..end];
        }
        let mut buf = BytesMut::with_capacity(ERROR_PAYLOAD_HEADER_LEN + detail.len());
        buf.put_u32_le(self.code() as u32);
        buf.put_u32_le(detail.len() as u32);
        buf.put_slice(detail.as_bytes());
        buf.freeze()
    }

    /// Parse an ERROR frame payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload.len() < 8 {
            return Self::status(ErrorCode::Internal, "malformed error payload");
        }

        let code = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let len = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;

        if payload.len() < 8 + len {
            return Self::status(ErrorCode::Internal, "malformed error payload");
        }

        let detail = String::from_utf8_lossy(&payload[8..8 + len]).into_owned();
        let Some(code) = ErrorCode::from_u32(code) else {
            return Self::status(ErrorCode::Unknown, detail);
        };

        match code {
            ErrorCode::ChannelClosed => Self::ChannelClosed,
            ErrorCode::InvalidState => Self::InvalidState(detail),
            ErrorCode::NotFound => Self::NotFound(detail),
            ErrorCode::UnsupportedShape => Self::UnsupportedShape(detail),
            ErrorCode::ProtocolViolation => Self::ProtocolViolation(detail),
            ErrorCode::ConnectionLost => Self::ConnectionLost,
            ErrorCode::DecodeError => Self::Decode(detail),
            ErrorCode::Cancelled => Self::Cancelled,
            code => Self::Status {
                code,
                message: detail,
            },
        }
    }
}

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame flags {0:#04x}")]
    UnknownFlags(u8),

    #[error("payload {len} bytes exceeds max {max}")]
    PayloadTooLarge { len: usize, max: u32 },
}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(_) => RpcError::ConnectionLost,
            other => RpcError::ProtocolViolation(other.to_string()),
        }
    }
}
