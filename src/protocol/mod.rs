//! Protocol module - wire format, frames, and the frame codec.
//!
//! - 8-byte header (magic + payload length) with configurable byte order
//! - Type-name prefixed frames
//! - Incremental decoding over a [`ByteCursorBuffer`](crate::buffer::ByteCursorBuffer)

mod frame;
mod frame_codec;
mod transform;
mod wire_format;

pub use frame::{wire_len, Frame};
pub use frame_codec::{Decoded, FrameCodec};
pub use transform::{Passthrough, PayloadTransform};
pub use wire_format::{
    ByteOrder, Header, DEFAULT_MAGIC, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_TYPE_NAME_LENGTH,
    HEADER_SIZE, TYPE_NAME_LEN_SIZE,
};
