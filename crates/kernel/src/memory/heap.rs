use alloc::{boxed::Box, sync::Arc};

use allocator::{
    MemoryProvider,
    heap::{HEAP_ALIGN, Heap, HeapBlock, HeapId, HeapStatus},
};
use log::debug;
use spin::Mutex;

/// A heap with its own lock and an optional growth provider.
#[derive(custom_debug_derive::Debug)]
pub struct HeapArena {
    id: HeapId,
    heap: Mutex<Heap>,
    #[debug(skip)]
    provider: Option<Arc<dyn MemoryProvider>>,
}

impl HeapArena {
    /// Creates an arena with no memory of its own.
    ///
    /// Without a provider every allocation fails until a region is added.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn MemoryProvider>>) -> Self {
        let heap = Heap::new();
        Self {
            id: heap.id(),
            heap: Mutex::new(heap),
            provider,
        }
    }

    /// Creates an arena managing `storage`.
    #[must_use]
    pub fn with_region(storage: Box<[u8]>, provider: Option<Arc<dyn MemoryProvider>>) -> Self {
        let arena = Self::new(provider);
        arena.add_region(storage);
        arena
    }

    #[must_use]
    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn add_region(&self, storage: Box<[u8]>) {
        self.heap.lock().add_region(storage);
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// Falls back to the growth provider when no free block fits. The
    /// provided memory becomes a block of this arena and returns to its free
    /// list when freed.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn alloc(&self, size: usize) -> Option<HeapBlock> {
        self.alloc_aligned(size, HEAP_ALIGN)
    }

    /// Allocates a block of at least `size` bytes whose payload offset is a
    /// multiple of `align`.
    ///
    /// The provider is asked for a region on an `align` boundary of its
    /// budget, large enough to place the payload on an aligned offset.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `align` is not a power of two.
    pub fn alloc_aligned(&self, size: usize, align: usize) -> Option<HeapBlock> {
        if let Some(block) = self.heap.lock().try_allocate_aligned(size, align) {
            return Some(block);
        }

        let provider = self.provider.as_ref()?;
        let total = Heap::region_size(size, align)?;
        let Some(storage) = provider.provide(total, align.max(HEAP_ALIGN)) else {
            debug!("heap {}: growth provider exhausted ({total} bytes)", self.id);
            return None;
        };
        debug!("heap {}: grew by {total} bytes", self.id);
        Some(self.heap.lock().adopt_aligned(storage, size, align))
    }

    /// Returns a block to this arena.
    ///
    /// # Panics
    ///
    /// Panics if the block belongs to another arena.
    pub fn free(&self, block: HeapBlock) {
        self.heap.lock().free(block);
    }

    #[must_use]
    pub fn status(&self) -> HeapStatus {
        self.heap.lock().status()
    }

    /// Runs `f` on the payload of `block`.
    ///
    /// The arena stays locked while `f` runs.
    pub fn with_payload<F, R>(&self, block: &HeapBlock, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.heap.lock().payload_mut(block))
    }
}
