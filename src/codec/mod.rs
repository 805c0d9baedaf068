//! Codec module - serialization of message bodies.
//!
//! The frame layer treats payloads as opaque bytes. [`JsonCodec`] is the body
//! format used by [`MessageRegistry`](crate::dispatch::MessageRegistry) and
//! [`Connection::send_message`](crate::Connection::send_message).
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is picked at compile time.

mod json;

pub use json::JsonCodec;
