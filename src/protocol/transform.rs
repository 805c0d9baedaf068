//! Payload transform hook.
//!
//! Runs on payload bytes after serialization on the way out and before
//! dispatch on the way in. Compression or encryption would plug in here;
//! the only shipped implementation is [`Passthrough`].

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::Result;

/// Reversible transformation applied to every payload.
pub trait PayloadTransform: Send + Sync + 'static {
    /// Transform an outgoing payload.
    fn outbound<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]>;

    /// Undo [`outbound`](Self::outbound) on a received payload.
    fn inbound(&self, payload: Bytes) -> Result<Bytes>;
}

/// Identity transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl PayloadTransform for Passthrough {
    #[inline]
    fn outbound<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(payload)
    }

    #[inline]
    fn inbound(&self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}
