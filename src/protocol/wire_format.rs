//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte header followed by the type name and
//! the payload:
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────┬─────────┐
//! │ Magic    │ Payload len  │ Type name len│ Type name │ Payload │
//! │ 4 bytes  │ 4 bytes      │ 4 bytes      │ N bytes   │ M bytes │
//! │ uint32   │ uint32 (= M) │ uint32 (= N) │ UTF-8     │ opaque  │
//! └──────────┴──────────────┴──────────────┴───────────┴─────────┘
//! ```
//!
//! Integers use the byte order both peers were configured with
//! (little endian unless stated otherwise).

use serde::{Deserialize, Serialize};

use crate::error::{FramelinkError, Result};

/// Header size in bytes (magic + payload length).
pub const HEADER_SIZE: usize = 8;

/// Size of the type-name length prefix that follows the header.
pub const TYPE_NAME_LEN_SIZE: usize = 4;

/// Default protocol magic shared by both peers.
pub const DEFAULT_MAGIC: u32 = 0x0000_ABCD;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Default maximum type name length.
pub const DEFAULT_MAX_TYPE_NAME_LENGTH: u32 = 256;

/// Byte order for every fixed-width integer on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    #[inline]
    pub fn u32_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    #[inline]
    pub fn u32_from_bytes(self, raw: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol constant; anything else means the stream is desynchronized.
    pub magic: u32,
    /// Payload length in bytes (type name excluded).
    pub payload_length: u32,
}

impl Header {
    pub fn new(magic: u32, payload_length: u32) -> Self {
        Self {
            magic,
            payload_length,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use framelink::protocol::{ByteOrder, Header};
    ///
    /// let bytes = Header::new(0xABCD, 5).encode(ByteOrder::Big);
    /// assert_eq!(bytes, [0, 0, 0xAB, 0xCD, 0, 0, 0, 5]);
    /// ```
    pub fn encode(&self, order: ByteOrder) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf, order);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8], order: ByteOrder) {
        buf[0..4].copy_from_slice(&order.u32_to_bytes(self.magic));
        buf[4..8].copy_from_slice(&order.u32_to_bytes(self.payload_length));
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8], order: ByteOrder) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: order.u32_from_bytes([buf[0], buf[1], buf[2], buf[3]]),
            payload_length: order.u32_from_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Check magic and payload bound.
    pub fn validate(&self, magic: u32, max_payload_size: u32) -> Result<()> {
        if self.magic != magic {
            return Err(FramelinkError::ProtocolDesync {
                expected: magic,
                found: self.magic,
            });
        }

        if self.payload_length > max_payload_size {
            return Err(FramelinkError::FrameTooLarge {
                size: self.payload_length as usize,
                max: max_payload_size as usize,
            });
        }

        Ok(())
    }
}
