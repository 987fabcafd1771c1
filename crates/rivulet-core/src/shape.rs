//! Call shapes.

use core::fmt;

/// The interaction pattern of a call, fixed when the call is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallShape {
    /// One request message, one response message.
    Unary = 0,
    /// One request message, any number of response messages.
    ServerStreaming = 1,
    /// Any number of request messages, one response message.
    ClientStreaming = 2,
    /// Any number of messages in both directions.
    Bidirectional = 3,
}

/// Which end of a call a stream handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The end that opened the call.
    Client,
    /// The end that serves the call through a registered handler.
    Server,
}

impl CallShape {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unary),
            1 => Some(Self::ServerStreaming),
            2 => Some(Self::ClientStreaming),
            3 => Some(Self::Bidirectional),
            _ => None,
        }
    }

    /// True if the client may send more than one message.
    pub fn client_streams(&self) -> bool {
        matches!(self, Self::ClientStreaming | Self::Bidirectional)
    }

    /// True if the server may send more than one message.
    pub fn server_streams(&self) -> bool {
        matches!(self, Self::ServerStreaming | Self::Bidirectional)
    }

    /// Maximum number of messages `side` may send, `None` if unbounded.
    ///
    /// A direction limited to one message is closed implicitly by its first send.
    pub fn send_limit(&self, side: Side) -> Option<u32> {
        let streams = match side {
            Side::Client => self.client_streams(),
            Side::Server => self.server_streams(),
        };
        (!streams).then_some(1)
    }

    /// Maximum number of messages `side` may receive, `None` if unbounded.
    pub fn recv_limit(&self, side: Side) -> Option<u32> {
        self.send_limit(side.peer())
    }
}

impl Side {
    pub fn peer(&self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::ServerStreaming => write!(f, "server-streaming"),
            Self::ClientStreaming => write!(f, "client-streaming"),
            Self::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_limits_per_side() {
        assert_eq!(CallShape::Unary.send_limit(Side::Client), Some(1));
        assert_eq!(CallShape::Unary.send_limit(Side::Server), Some(1));

        assert_eq!(CallShape::ServerStreaming.send_limit(Side::Client), Some(1));
        assert_eq!(CallShape::ServerStreaming.send_limit(Side::Server), None);

        assert_eq!(CallShape::ClientStreaming.send_limit(Side::Client), None);
        assert_eq!(CallShape::ClientStreaming.send_limit(Side::Server), Some(1));

        assert_eq!(CallShape::Bidirectional.send_limit(Side::Client), None);
        assert_eq!(CallShape::Bidirectional.recv_limit(Side::Server), None);
    }

    #[test]
    fn test_recv_limit_mirrors_peer_send_limit() {
        for shape in [
            CallShape::Unary,
            CallShape::ServerStreaming,
            CallShape::ClientStreaming,
            CallShape::Bidirectional,
        ] {
            assert_eq!(shape.recv_limit(Side::Server), shape.send_limit(Side::Client));
            assert_eq!(shape.recv_limit(Side::Client), shape.send_limit(Side::Server));
        }
    }

    #[test]
    fn test_unknown_shape_byte() {
        assert_eq!(CallShape::from_u8(2), Some(CallShape::ClientStreaming));
        assert_eq!(CallShape::from_u8(4), None);
    }
}
