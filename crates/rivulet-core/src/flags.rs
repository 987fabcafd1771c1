//! Frame flags.

use bitflags::bitflags;

bitflags! {
    /// Control flags carried in every frame header.
    ///
    /// A frame with no flags set is a plain data frame carrying one message.
    /// Bits outside the defined set make the frame a protocol violation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// Opens a new stream. The payload is the encoded [`CallHeader`](crate::CallHeader).
        const OPEN       = 0b0000_0001;

        /// The sender will send no further messages on this stream (half-close).
        ///
        /// A non-empty payload is delivered as the final message.
        const HALF_CLOSE = 0b0000_0010;

        /// Terminal error for the stream. The payload is an encoded [`RpcError`](crate::RpcError).
        const ERROR      = 0b0000_0100;
    }
}

impl FrameFlags {
    /// True if the frame carries no control flags at all.
    pub fn is_data(&self) -> bool {
        self.is_empty()
    }
}
