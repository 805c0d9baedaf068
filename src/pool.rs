//! Thread-safe object pool for reusable I/O resources.
//!
//! Receive scratch space and outbound packet buffers are recycled through an
//! [`ObjectPool`] instead of being allocated per message.
//!
//! # Design
//!
//! - LIFO free list behind a `parking_lot::Mutex`; the most recently freed
//!   instance is handed out first so it is likely still warm in cache
//! - `allocate()` never blocks and never fails: an empty free list falls
//!   back to the factory
//! - Borrowed instances are wrapped in [`Pooled`], an owning handle that
//!   resets and returns the instance when dropped
//!
//! Because [`Pooled::free`] consumes the handle, freeing twice or touching an
//! instance after it was freed does not compile.
//!
//! # Example
//!
//! ```
//! use framelink::pool::{ObjectPool, Poolable};
//!
//! #[derive(Default)]
//! struct Scratch(Vec<u8>);
//!
//! impl Poolable for Scratch {
//!     fn reset(&mut self) {
//!         self.0.clear();
//!     }
//! }
//!
//! let pool = ObjectPool::with_capacity(4, Scratch::default);
//! let mut item = pool.allocate();
//! item.0.extend_from_slice(b"hello");
//! item.free();
//! assert_eq!(pool.available(), 4);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A resource that can be recycled through an [`ObjectPool`].
pub trait Poolable: Send + 'static {
    /// Clear logical state before the instance goes back on the free list.
    fn reset(&mut self);
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T> {
    free: Mutex<Vec<T>>,
    factory: Factory<T>,
    /// Total instances ever constructed by this pool.
    created: AtomicUsize,
    /// Free-list bound; instances freed above it are dropped.
    max_idle: Option<usize>,
}

impl<T: Poolable> PoolInner<T> {
    fn release(&self, mut item: T) {
        item.reset();
        let mut free = self.free.lock();
        if let Some(max) = self.max_idle {
            if free.len() >= max {
                return;
            }
        }
        free.push(item);
    }
}

/// Shared free list of reusable instances.
///
/// Cloning an `ObjectPool` is cheap; all clones share one free list.
pub struct ObjectPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create an empty pool. Instances are built lazily by `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(0, None, Box::new(factory))
    }

    /// Create a pool pre-filled with `capacity` instances.
    pub fn with_capacity<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(capacity, None, Box::new(factory))
    }

    /// Create a pre-filled pool whose free list never holds more than `max_idle`.
    pub fn bounded<F>(capacity: usize, max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(capacity.min(max_idle), Some(max_idle), Box::new(factory))
    }

    fn build(capacity: usize, max_idle: Option<usize>, factory: Factory<T>) -> Self {
        let free: Vec<T> = (0..capacity).map(|_| factory()).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                factory,
                created: AtomicUsize::new(capacity),
                max_idle,
            }),
        }
    }

    /// Take an instance from the free list, constructing one if it is empty.
    pub fn allocate(&self) -> Pooled<T> {
        let recycled = self.inner.free.lock().pop();
        let item = match recycled {
            Some(item) => item,
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                (self.inner.factory)()
            }
        };

        Pooled {
            item: Some(item),
            pool: self.inner.clone(),
        }
    }

    /// Number of instances currently on the free list.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Total number of instances this pool has constructed.
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Poolable> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.available())
            .field("created", &self.created())
            .finish()
    }
}

/// Exclusive handle to a pooled instance.
///
/// The instance goes back to its pool when the handle is dropped or
/// [`free`](Pooled::free)d.
pub struct Pooled<T: Poolable> {
    // Only `None` inside `drop` / `detach`.
    item: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Poolable> Pooled<T> {
    /// Return the instance to its pool.
    #[inline]
    pub fn free(self) {
        drop(self);
    }

    /// Take the instance out of the pool's custody for good.
    pub fn detach(mut self) -> T {
        self.item
            .take()
            .expect("pooled item is present until drop or detach")
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item
            .as_ref()
            .expect("pooled item is present until drop or detach")
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item
            .as_mut()
            .expect("pooled item is present until drop or detach")
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
