//! Decoded frame.
//!
//! A [`Frame`] exists only between decoding and dispatch; the payload is a
//! `bytes::Bytes` so handlers can keep it without copying.

use bytes::Bytes;

use super::wire_format::{HEADER_SIZE, TYPE_NAME_LEN_SIZE};

/// One complete application message taken off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type name used to pick a decoder.
    pub type_name: String,
    /// Opaque serialized message body.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(type_name: impl Into<String>, payload: Bytes) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn wire_len(&self) -> usize {
        wire_len(self.type_name.len(), self.payload.len())
    }
}

/// Wire size of a frame with the given field lengths.
#[inline]
pub fn wire_len(type_name_len: usize, payload_len: usize) -> usize {
    HEADER_SIZE + TYPE_NAME_LEN_SIZE + type_name_len + payload_len
}
