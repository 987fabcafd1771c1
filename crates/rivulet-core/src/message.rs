use bytes::Bytes;

use crate::StreamId;

/// One application message: an opaque payload bound to the call that carries it.
///
/// Messages are immutable once built; the payload is reference-counted, so
/// clones are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    stream_id: StreamId,
    payload: Bytes,
}

impl Message {
    pub fn new(stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            payload: payload.into(),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
