//! Byte-stream transports.
//!
//! A transport is any reliable, ordered, bidirectional byte stream. The
//! multiplexer layers its frame format on top, so TCP sockets, Unix sockets and
//! in-memory pipes all work unchanged.

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

/// Buffer size of each direction of an in-memory [`pair`].
pub const MEM_PIPE_CAPACITY: usize = 64 * 1024;

pub trait Transport: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + 'static {}

/// A connected in-memory transport pair: bytes written to one end are read
/// from the other. Dropping one end reads as end-of-connection on the other.
pub fn pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(MEM_PIPE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::{Frame, FrameCodec};

    #[tokio::test]
    async fn test_frames_cross_the_pipe() {
        let (a, b) = pair();
        let mut tx = FramedWrite::new(a, FrameCodec::new(1024));
        let mut rx = FramedRead::new(b, FrameCodec::new(1024));

        tx.send(Frame::data(1, "from A".into())).await.unwrap();
        tx.send(Frame::half_close(1)).await.unwrap();

        let first = rx.next().await.unwrap().unwrap();
        assert_eq!(&first.payload[..], b"from A");
        assert!(rx.next().await.unwrap().unwrap().is_half_close());

        drop(tx);
        assert!(rx.next().await.is_none());
    }
}
