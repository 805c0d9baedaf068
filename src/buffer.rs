//! Growable circular byte buffer with independent read and write cursors.
//!
//! `front` is the next unread byte and `rear` the next free slot. Both only
//! move forward and are mapped onto storage modulo the capacity, so
//! `len = rear - front` holds across wraparound.
//!
//! ```text
//!            front            rear
//!              v                v
//! ┌───────────┬────────────────┬──────────┐
//! │   free    │  unread bytes  │   free   │
//! └───────────┴────────────────┴──────────┘
//! ```
//!
//! The buffer is not self-framing: every read is checked against `len` and
//! fails with [`BufferError::InsufficientData`] rather than overreading.

use bytes::Bytes;
use thiserror::Error;

use crate::pool::Poolable;
use crate::protocol::{ByteOrder, Header, HEADER_SIZE};

/// Capacity a recycled buffer may keep. Larger buffers drop back to their
/// initial capacity on [`Poolable::reset`].
pub const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Cursor misuse on a [`ByteCursorBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Not enough free space for a write or rear advance.
    #[error("Buffer full: need {needed} bytes, {writable} writable")]
    BufferFull { needed: usize, writable: usize },

    /// Not enough unread bytes for a read, peek or front advance.
    #[error("Insufficient data: requested {requested} bytes, {available} available")]
    InsufficientData { requested: usize, available: usize },

    /// Growth target cannot hold the unread bytes.
    #[error("Capacity {requested} cannot hold {len} unread bytes")]
    CapacityTooSmall { requested: usize, len: usize },
}

/// Circular byte buffer used for receiving and for outbound packet scratch.
#[derive(Debug, Clone)]
pub struct ByteCursorBuffer {
    storage: Box<[u8]>,
    front: usize,
    rear: usize,
    initial_capacity: usize,
}

impl ByteCursorBuffer {
    /// Create a buffer with the given capacity (at least 1 byte).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            front: 0,
            rear: 0,
            initial_capacity: capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.rear.wrapping_sub(self.front)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space left before the buffer must grow.
    #[inline]
    pub fn writable(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.writable() == 0
    }

    /// Drop all unread bytes and rewind both cursors to offset 0.
    pub fn clear(&mut self) {
        self.front = 0;
        self.rear = 0;
    }

    #[inline]
    fn offset(&self, cursor: usize) -> usize {
        cursor % self.capacity()
    }

    /// Append bytes at `rear`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if data.len() > self.writable() {
            return Err(BufferError::BufferFull {
                needed: data.len(),
                writable: self.writable(),
            });
        }

        let start = self.offset(self.rear);
        let first = data.len().min(self.capacity() - start);
        self.storage[start..start + first].copy_from_slice(&data[..first]);
        self.storage[..data.len() - first].copy_from_slice(&data[first..]);
        self.rear = self.rear.wrapping_add(data.len());
        Ok(())
    }

    /// Append a u32 in the given byte order.
    pub fn write_u32(&mut self, value: u32, order: ByteOrder) -> Result<(), BufferError> {
        self.write(&order.u32_to_bytes(value))
    }

    /// Copy `out.len()` bytes starting `offset` bytes past `front`, without consuming.
    pub fn peek_at(&self, offset: usize, out: &mut [u8]) -> Result<(), BufferError> {
        let needed = offset + out.len();
        if needed > self.len() {
            return Err(BufferError::InsufficientData {
                requested: needed,
                available: self.len(),
            });
        }

        let start = self.offset(self.front.wrapping_add(offset));
        let first = out.len().min(self.capacity() - start);
        out[..first].copy_from_slice(&self.storage[start..start + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.storage[..rest]);
        Ok(())
    }

    /// Copy `out.len()` bytes from `front`, without consuming.
    #[inline]
    pub fn peek_into(&self, out: &mut [u8]) -> Result<(), BufferError> {
        self.peek_at(0, out)
    }

    /// Read a u32 located `offset` bytes past `front`, without consuming.
    pub fn peek_u32_at(&self, offset: usize, order: ByteOrder) -> Result<u32, BufferError> {
        let mut raw = [0u8; 4];
        self.peek_at(offset, &mut raw)?;
        Ok(order.u32_from_bytes(raw))
    }

    /// Peek the frame header at `front`.
    pub fn peek_header(&self, order: ByteOrder) -> Result<Header, BufferError> {
        let mut raw = [0u8; HEADER_SIZE];
        self.peek_at(0, &mut raw)?;
        Header::decode(&raw, order).ok_or(BufferError::InsufficientData {
            requested: HEADER_SIZE,
            available: self.len(),
        })
    }

    /// Consume exactly `out.len()` bytes into `out`.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        self.peek_at(0, out)?;
        self.front = self.front.wrapping_add(out.len());
        Ok(())
    }

    /// Consume `count` bytes into an owned `Bytes`.
    pub fn read(&mut self, count: usize) -> Result<Bytes, BufferError> {
        if count > self.len() {
            return Err(BufferError::InsufficientData {
                requested: count,
                available: self.len(),
            });
        }
        let mut out = vec![0u8; count];
        self.read_into(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Consume a u32 in the given byte order.
    pub fn read_u32(&mut self, order: ByteOrder) -> Result<u32, BufferError> {
        let mut raw = [0u8; 4];
        self.read_into(&mut raw)?;
        Ok(order.u32_from_bytes(raw))
    }

    /// Skip `n` unread bytes without copying.
    pub fn advance_front(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.len() {
            return Err(BufferError::InsufficientData {
                requested: n,
                available: self.len(),
            });
        }
        self.front = self.front.wrapping_add(n);
        Ok(())
    }

    /// Commit `n` bytes that were written directly into [`writable_chunk_mut`](Self::writable_chunk_mut).
    pub fn advance_rear(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.writable() {
            return Err(BufferError::BufferFull {
                needed: n,
                writable: self.writable(),
            });
        }
        self.rear = self.rear.wrapping_add(n);
        Ok(())
    }

    /// Largest contiguous free region starting at `rear`.
    ///
    /// Socket reads land here and are committed with `advance_rear`. When
    /// the buffer is empty the cursors are rewound first so the whole
    /// storage is offered.
    pub fn writable_chunk_mut(&mut self) -> &mut [u8] {
        if self.is_empty() {
            self.clear();
        }
        if self.is_full() {
            return &mut self.storage[..0];
        }

        let start = self.offset(self.rear);
        let front = self.offset(self.front);
        let end = if start >= front {
            self.capacity()
        } else {
            front
        };
        &mut self.storage[start..end]
    }

    /// Unread bytes as at most two slices, in order.
    pub fn readable_slices(&self) -> (&[u8], &[u8]) {
        let len = self.len();
        if len == 0 {
            return (&[], &[]);
        }

        let start = self.offset(self.front);
        let first = len.min(self.capacity() - start);
        (
            &self.storage[start..start + first],
            &self.storage[..len - first],
        )
    }

    /// Reallocate to `new_capacity`, moving unread bytes to offset 0.
    pub fn grow(&mut self, new_capacity: usize) -> Result<(), BufferError> {
        let len = self.len();
        if new_capacity < len || new_capacity == 0 {
            return Err(BufferError::CapacityTooSmall {
                requested: new_capacity,
                len,
            });
        }

        let mut storage = vec![0u8; new_capacity].into_boxed_slice();
        let (a, b) = self.readable_slices();
        storage[..a.len()].copy_from_slice(a);
        storage[a.len()..len].copy_from_slice(b);

        self.storage = storage;
        self.front = 0;
        self.rear = len;
        Ok(())
    }

    /// Double the capacity until at least `additional` bytes are writable.
    pub fn grow_for(&mut self, additional: usize) -> Result<(), BufferError> {
        if self.writable() >= additional {
            return Ok(());
        }
        let len = self.len();
        let mut capacity = self.capacity();
        while capacity - len < additional {
            capacity *= 2;
        }
        self.grow(capacity)
    }
}

impl Poolable for ByteCursorBuffer {
    fn reset(&mut self) {
        self.clear();
        if self.capacity() > self.initial_capacity.max(MAX_RETAINED_CAPACITY) {
            self.storage = vec![0u8; self.initial_capacity].into_boxed_slice();
        }
    }
}
