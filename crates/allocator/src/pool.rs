//! Fixed-size object pool.
//!
//! A [`MemoryPool`] hands out objects of a single size in constant time. Free
//! objects are tracked on a stack of slot positions kept beside the pool's
//! memory, so the last object released is the first one handed out again and
//! object memory is never reinterpreted as a link.
//!
//! Memory enters a pool in three ways:
//!
//! - [`MemoryPool::load`] adds an array of contiguous objects
//! - [`MemoryPool::add`] adds a single object
//! - [`MemoryPool::adopt`] takes a single object that is already in use,
//!   typically one just obtained from a growth provider
//!
//! Adopted objects join the free stack once released, so callers cannot tell
//! where an object came from. The pool itself never grows; the locked
//! wrappers in the kernel call the provider.

use alloc::{boxed::Box, vec::Vec};
use core::{
    fmt,
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Identity of a [`MemoryPool`], carried by every object it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(NonZeroUsize);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl PoolId {
    fn new() -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroUsize::MIN.saturating_add(id))
    }
}

/// An object handed out by a [`MemoryPool`].
///
/// Consumed by [`MemoryPool::free`].
#[must_use = "dropping a pool object without freeing it leaks the object"]
#[derive(Debug, PartialEq, Eq)]
pub struct PoolObject {
    pool: PoolId,
    segment: usize,
    offset: usize,
}

impl PoolObject {
    /// Returns the pool this object belongs to.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Returns the position of the object inside its pool.
    ///
    /// Handles are move-only; the slot lets callers remember which memory an
    /// object used after it has been freed.
    pub fn slot(&self) -> (usize, usize) {
        (self.segment, self.offset)
    }
}

/// A fixed-size object allocator.
///
/// # Thread Safety
///
/// This pool is `Send` but not `Sync`. It requires external synchronization
/// for concurrent access.
#[derive(custom_debug_derive::Debug)]
pub struct MemoryPool {
    id: PoolId,
    object_size: usize,
    align: usize,
    #[debug(skip)]
    segments: Vec<Box<[u8]>>,
    free: Vec<(usize, usize)>,
}

impl MemoryPool {
    /// Creates an empty pool of `object_size` byte objects aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics if `object_size` is smaller than a machine word, or if `align`
    /// is not a power of two at least as large as the natural alignment.
    #[must_use]
    pub fn new(object_size: usize, align: usize) -> Self {
        assert!(
            object_size >= size_of::<usize>(),
            "pool object size {object_size} is smaller than a machine word"
        );
        assert!(
            align.is_power_of_two() && align >= align_of::<usize>(),
            "invalid pool alignment {align}"
        );
        Self {
            id: PoolId::new(),
            object_size,
            align,
            segments: Vec::new(),
            free: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Number of objects on the free stack.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Adds `count` contiguous objects laid out in `storage`.
    ///
    /// The objects are released one by one in array order, so the last object
    /// of the array is the first one allocated.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is shorter than `count` objects or an object is
    /// misaligned.
    pub fn load(&mut self, storage: Box<[u8]>, count: usize) {
        assert!(
            storage.len() / self.object_size >= count,
            "{} bytes cannot hold {count} objects of {} bytes",
            storage.len(),
            self.object_size
        );
        let segment = self.push_segment(storage);
        for index in 0..count {
            self.release(segment, index * self.object_size);
        }
    }

    /// Adds a single object.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is smaller than one object.
    pub fn add(&mut self, storage: Box<[u8]>) {
        self.load(storage, 1);
    }

    /// Pops an object from the free stack.
    pub fn alloc(&mut self) -> Option<PoolObject> {
        let (segment, offset) = self.free.pop()?;
        Some(PoolObject {
            pool: self.id,
            segment,
            offset,
        })
    }

    /// Takes ownership of an object-sized region and returns it as an
    /// allocated object.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is smaller than one object.
    pub fn adopt(&mut self, storage: Box<[u8]>) -> PoolObject {
        assert!(
            storage.len() >= self.object_size,
            "provided region of {} bytes is smaller than a {} byte object",
            storage.len(),
            self.object_size
        );
        let segment = self.push_segment(storage);
        PoolObject {
            pool: self.id,
            segment,
            offset: 0,
        }
    }

    /// Returns an object to the top of the free stack.
    ///
    /// # Panics
    ///
    /// Panics if the object belongs to another pool or violates the pool's
    /// alignment.
    pub fn free(&mut self, object: PoolObject) {
        assert_eq!(
            object.pool, self.id,
            "object of pool {} freed into pool {}",
            object.pool, self.id
        );
        self.release(object.segment, object.offset);
    }

    /// Returns the contents of an allocated object.
    ///
    /// # Panics
    ///
    /// Panics if the object belongs to another pool.
    #[must_use]
    pub fn object(&self, object: &PoolObject) -> &[u8] {
        assert_eq!(object.pool, self.id, "object belongs to another pool");
        &self.segments[object.segment][object.offset..object.offset + self.object_size]
    }

    /// Returns the contents of an allocated object for writing.
    ///
    /// # Panics
    ///
    /// Panics if the object belongs to another pool.
    pub fn object_mut(&mut self, object: &PoolObject) -> &mut [u8] {
        assert_eq!(object.pool, self.id, "object belongs to another pool");
        &mut self.segments[object.segment][object.offset..object.offset + self.object_size]
    }

    fn push_segment(&mut self, storage: Box<[u8]>) -> usize {
        self.segments.push(storage);
        self.segments.len() - 1
    }

    fn release(&mut self, segment: usize, offset: usize) {
        assert!(
            offset % self.align == 0,
            "pool {}: object at offset {offset} is not aligned to {}",
            self.id,
            self.align
        );
        self.free.push((segment, offset));
    }
}
