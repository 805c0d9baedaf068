//! Frame encoder and incremental decoder over a [`ByteCursorBuffer`].
//!
//! Decoding peeks before it consumes: a frame is only taken off the buffer
//! once every byte of it has arrived, so a partial frame stays in place
//! until the next socket read tops it up.
//!
//! # Example
//!
//! ```
//! use framelink::buffer::ByteCursorBuffer;
//! use framelink::protocol::{Decoded, FrameCodec};
//!
//! let codec = FrameCodec::default();
//! let mut buffer = ByteCursorBuffer::with_capacity(64);
//! codec.encode_into("MsgChat", br#"{"text":"hi"}"#, &mut buffer).unwrap();
//!
//! match codec.try_decode_one(&mut buffer).unwrap() {
//!     Decoded::Frame(frame) => assert_eq!(frame.type_name, "MsgChat"),
//!     Decoded::Incomplete => unreachable!(),
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::frame::{wire_len, Frame};
use super::transform::{Passthrough, PayloadTransform};
use super::wire_format::{
    ByteOrder, Header, DEFAULT_MAGIC, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_TYPE_NAME_LENGTH,
    HEADER_SIZE, TYPE_NAME_LEN_SIZE,
};
use crate::buffer::ByteCursorBuffer;
use crate::error::{FramelinkError, Result};

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was consumed from the buffer.
    Frame(Frame),
    /// More bytes are needed; nothing was consumed.
    Incomplete,
}

/// Encoder/decoder for the length-prefixed frame format.
#[derive(Clone)]
pub struct FrameCodec {
    magic: u32,
    byte_order: ByteOrder,
    max_payload_size: u32,
    max_type_name_length: u32,
    transform: Arc<dyn PayloadTransform>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            byte_order: ByteOrder::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_type_name_length: DEFAULT_MAX_TYPE_NAME_LENGTH,
            transform: Arc::new(Passthrough),
        }
    }

    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn with_max_type_name_length(mut self, max: u32) -> Self {
        self.max_type_name_length = max;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn PayloadTransform>) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Append one encoded frame to `buffer`, growing it if needed.
    ///
    /// Returns the number of bytes written.
    pub fn encode_into(
        &self,
        type_name: &str,
        payload: &[u8],
        buffer: &mut ByteCursorBuffer,
    ) -> Result<usize> {
        if type_name.len() > self.max_type_name_length as usize {
            return Err(FramelinkError::FrameTooLarge {
                size: type_name.len(),
                max: self.max_type_name_length as usize,
            });
        }

        let payload = self.transform.outbound(payload);
        if payload.len() > self.max_payload_size as usize {
            return Err(FramelinkError::FrameTooLarge {
                size: payload.len(),
                max: self.max_payload_size as usize,
            });
        }

        let total = wire_len(type_name.len(), payload.len());
        buffer.grow_for(total)?;

        let header = Header::new(self.magic, payload.len() as u32);
        buffer.write(&header.encode(self.byte_order))?;
        buffer.write_u32(type_name.len() as u32, self.byte_order)?;
        buffer.write(type_name.as_bytes())?;
        buffer.write(&payload)?;

        Ok(total)
    }

    /// Encode one frame into a fresh contiguous buffer.
    pub fn encode(&self, type_name: &str, payload: &[u8]) -> Result<Bytes> {
        let mut buffer = ByteCursorBuffer::with_capacity(wire_len(type_name.len(), payload.len()));
        self.encode_into(type_name, payload, &mut buffer)?;
        Ok(buffer.read(buffer.len())?)
    }

    /// Try to take one complete frame off the front of `buffer`.
    ///
    /// # Errors
    ///
    /// `ProtocolDesync` on a bad magic, `FrameTooLarge` when a length field
    /// exceeds its bound, `InvalidTypeName` for a non-UTF-8 type name. All of
    /// them mean the stream can no longer be trusted.
    pub fn try_decode_one(&self, buffer: &mut ByteCursorBuffer) -> Result<Decoded> {
        let available = buffer.len();
        if available < HEADER_SIZE {
            return Ok(Decoded::Incomplete);
        }

        let header = buffer.peek_header(self.byte_order)?;
        header.validate(self.magic, self.max_payload_size)?;

        let payload_length = header.payload_length as usize;
        if available < HEADER_SIZE + TYPE_NAME_LEN_SIZE + payload_length {
            return Ok(Decoded::Incomplete);
        }

        let type_name_length = buffer.peek_u32_at(HEADER_SIZE, self.byte_order)?;
        if type_name_length > self.max_type_name_length {
            return Err(FramelinkError::FrameTooLarge {
                size: type_name_length as usize,
                max: self.max_type_name_length as usize,
            });
        }
        if available < wire_len(type_name_length as usize, payload_length) {
            return Ok(Decoded::Incomplete);
        }

        buffer.advance_front(HEADER_SIZE + TYPE_NAME_LEN_SIZE)?;
        let name = buffer.read(type_name_length as usize)?;
        let payload = buffer.read(payload_length)?;

        let type_name =
            String::from_utf8(name.to_vec()).map_err(|_| FramelinkError::InvalidTypeName)?;
        let payload = self.transform.inbound(payload)?;

        Ok(Decoded::Frame(Frame { type_name, payload }))
    }

    /// Drain every complete frame currently buffered, in wire order.
    pub fn decode_all(&self, buffer: &mut ByteCursorBuffer) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Decoded::Frame(frame) = self.try_decode_one(buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("magic", &format_args!("{:#010x}", self.magic))
            .field("byte_order", &self.byte_order)
            .field("max_payload_size", &self.max_payload_size)
            .field("max_type_name_length", &self.max_type_name_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Append bytes the way the receive loop does: grow first, then write.
    fn feed(buffer: &mut ByteCursorBuffer, chunk: &[u8]) {
        buffer.grow_for(chunk.len()).unwrap();
        buffer.write(chunk).unwrap();
    }

    fn decoded_frame(outcome: Decoded) -> Frame {
        match outcome {
            Decoded::Frame(frame) => frame,
            Decoded::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn test_single_complete_frame() {
        let codec = FrameCodec::new();
        let mut buffer = ByteCursorBuffer::with_capacity(64);
        codec.encode_into("MsgChat", b"hello", &mut buffer).unwrap();

        let frame = decoded_frame(codec.try_decode_one(&mut buffer).unwrap());
        assert_eq!(frame.type_name, "MsgChat");
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encode_layout() {
        let codec = FrameCodec::new().with_byte_order(ByteOrder::Big);
        let bytes = codec.encode("Ab", b"xyz").unwrap();

        assert_eq!(
            &bytes[..],
            &[
                0x00, 0x00, 0xAB, 0xCD, // magic
                0x00, 0x00, 0x00, 0x03, // payload length
                0x00, 0x00, 0x00, 0x02, // type name length
                b'A', b'b', b'x', b'y', b'z',
            ]
        );
    }

    #[test]
    fn test_two_frames_in_one_append() {
        let codec = FrameCodec::new();
        let mut wire = codec.encode("First", b"1").unwrap().to_vec();
        wire.extend_from_slice(&codec.encode("Second", b"22").unwrap());

        let mut buffer = ByteCursorBuffer::with_capacity(8);
        feed(&mut buffer, &wire);

        let frames = codec.decode_all(&mut buffer).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::new("First", Bytes::from_static(b"1")),
                Frame::new("Second", Bytes::from_static(b"22")),
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_short_header_is_incomplete() {
        let codec = FrameCodec::new();
        let wire = codec.encode("Msg", b"body").unwrap();

        let mut buffer = ByteCursorBuffer::with_capacity(64);
        feed(&mut buffer, &wire[..HEADER_SIZE - 1]);

        assert_eq!(codec.try_decode_one(&mut buffer).unwrap(), Decoded::Incomplete);
        assert_eq!(buffer.len(), HEADER_SIZE - 1);
    }

    #[test]
    fn test_partial_payload_then_completion() {
        // 0xABCD header announcing 20 payload bytes in a 16-byte buffer
        let codec = FrameCodec::new();
        let payload: Vec<u8> = (0u8..20).collect();
        let wire = codec.encode("", &payload).unwrap();
        let prefix = HEADER_SIZE + TYPE_NAME_LEN_SIZE;

        let mut buffer = ByteCursorBuffer::with_capacity(16);
        feed(&mut buffer, &wire[..prefix + 10]);
        assert_eq!(codec.try_decode_one(&mut buffer).unwrap(), Decoded::Incomplete);
        assert_eq!(buffer.len(), prefix + 10);

        feed(&mut buffer, &wire[prefix + 10..]);
        feed(&mut buffer, b"next");

        let frame = decoded_frame(codec.try_decode_one(&mut buffer).unwrap());
        assert_eq!(&frame.payload[..], &payload[..]);
        assert_eq!(buffer.len(), 4);
        let mut rest = [0u8; 4];
        buffer.peek_into(&mut rest).unwrap();
        assert_eq!(&rest, b"next");
    }

    #[test]
    fn test_type_name_not_yet_arrived() {
        // Empty payload: header alone satisfies the payload-length check
        let codec = FrameCodec::new();
        let wire = codec.encode("LongTypeName", b"").unwrap();

        let mut buffer = ByteCursorBuffer::with_capacity(64);
        feed(&mut buffer, &wire[..HEADER_SIZE + TYPE_NAME_LEN_SIZE + 3]);
        assert_eq!(codec.try_decode_one(&mut buffer).unwrap(), Decoded::Incomplete);

        feed(&mut buffer, &wire[HEADER_SIZE + TYPE_NAME_LEN_SIZE + 3..]);
        let frame = decoded_frame(codec.try_decode_one(&mut buffer).unwrap());
        assert_eq!(frame.type_name, "LongTypeName");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_bad_magic_is_desync() {
        let codec = FrameCodec::new();
        let mut wire = codec.encode("Msg", b"body").unwrap().to_vec();
        wire[0] ^= 0xFF;

        let mut buffer = ByteCursorBuffer::with_capacity(64);
        feed(&mut buffer, &wire);

        let err = codec.try_decode_one(&mut buffer).unwrap_err();
        assert!(matches!(err, FramelinkError::ProtocolDesync { .. }));
        assert_eq!(buffer.len(), wire.len());
    }

    #[test]
    fn test_magic_mismatch_between_peers() {
        let sender = FrameCodec::new().with_magic(0x1234_5678);
        let receiver = FrameCodec::new();
        let mut buffer = ByteCursorBuffer::with_capacity(64);
        sender.encode_into("Msg", b"x", &mut buffer).unwrap();

        assert!(matches!(
            receiver.try_decode_one(&mut buffer),
            Err(FramelinkError::ProtocolDesync {
                expected: DEFAULT_MAGIC,
                found: 0x1234_5678
            })
        ));
    }

    #[test]
    fn test_oversized_payload_rejected_before_buffering() {
        let codec = FrameCodec::new().with_max_payload_size(8);
        let mut buffer = ByteCursorBuffer::with_capacity(64);
        buffer
            .write(&Header::new(DEFAULT_MAGIC, 1_000_000).encode(ByteOrder::Little))
            .unwrap();

        assert!(matches!(
            codec.try_decode_one(&mut buffer),
            Err(FramelinkError::FrameTooLarge { size: 1_000_000, max: 8 })
        ));
    }

    #[test]
    fn test_oversized_type_name_rejected() {
        let codec = FrameCodec::new().with_max_type_name_length(4);
        let mut buffer = ByteCursorBuffer::with_capacity(64);
        assert!(matches!(
            codec.encode_into("TooLong", b"", &mut buffer),
            Err(FramelinkError::FrameTooLarge { size: 7, max: 4 })
        ));

        FrameCodec::new()
            .encode_into("TooLong", b"", &mut buffer)
            .unwrap();
        assert!(matches!(
            codec.try_decode_one(&mut buffer),
            Err(FramelinkError::FrameTooLarge { size: 7, max: 4 })
        ));
    }

    #[test]
    fn test_invalid_utf8_type_name() {
        let codec = FrameCodec::new();
        let mut buffer = ByteCursorBuffer::with_capacity(64);
        buffer
            .write(&Header::new(DEFAULT_MAGIC, 0).encode(ByteOrder::Little))
            .unwrap();
        buffer.write_u32(2, ByteOrder::Little).unwrap();
        buffer.write(&[0xFF, 0xFE]).unwrap();

        assert!(matches!(
            codec.try_decode_one(&mut buffer),
            Err(FramelinkError::InvalidTypeName)
        ));
    }

    #[test]
    fn test_decode_across_wrapped_storage() {
        let codec = FrameCodec::new();
        let wire = codec.encode("Wrap", b"around").unwrap();

        let mut buffer = ByteCursorBuffer::with_capacity(32);
        buffer.write(&[0u8; 20]).unwrap();
        buffer.advance_front(20).unwrap();
        buffer.write(&wire).unwrap();

        let frame = decoded_frame(codec.try_decode_one(&mut buffer).unwrap());
        assert_eq!(frame.type_name, "Wrap");
        assert_eq!(&frame.payload[..], b"around");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(name in "[A-Za-z_][A-Za-z0-9_]{0,31}", payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let codec = FrameCodec::new();
            let mut buffer = ByteCursorBuffer::with_capacity(16);
            codec.encode_into(&name, &payload, &mut buffer).unwrap();

            let frame = decoded_frame(codec.try_decode_one(&mut buffer).unwrap());
            prop_assert_eq!(frame.type_name, name);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }

        #[test]
        fn prop_split_reassembly(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let codec = FrameCodec::new();
            let wire = codec.encode("MsgSplit", &payload).unwrap();

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
            points.push(0);
            points.push(wire.len());
            points.sort_unstable();
            points.dedup();

            let mut buffer = ByteCursorBuffer::with_capacity(4);
            let mut frames = Vec::new();
            for pair in points.windows(2) {
                feed(&mut buffer, &wire[pair[0]..pair[1]]);
                frames.extend(codec.decode_all(&mut buffer).unwrap());
            }

            prop_assert_eq!(frames, vec![Frame::new("MsgSplit", Bytes::from(payload))]);
            prop_assert!(buffer.is_empty());
        }
    }
}
