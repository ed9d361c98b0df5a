//! First-fit heap allocator.
//!
//! This module provides a general-purpose allocator over one or more memory
//! chunks. Chunks are added explicitly with [`Heap::add_region`] or adopted
//! from a growth provider with [`Heap::adopt`].
//!
//! # Algorithm
//!
//! The heap uses a **first-fit** allocation strategy combined with an
//! **address-ordered free list**:
//!
//! - **Free List**: Free blocks are kept in a map ordered by block address,
//!   so a scan visits them in the same order the memory is laid out
//! - **Allocation**: The first free block whose payload is large enough is
//!   taken. If the surplus would not even hold a header plus one alignment
//!   unit, the whole block is handed out; otherwise it is split and the tail
//!   goes back into the free list
//! - **Aligned Allocation**: The payload is placed on the first aligned offset
//!   whose leading gap is either empty or large enough to stay behind as a
//!   free block of its own
//! - **Release**: Freed blocks are coalesced with both address-adjacent free
//!   neighbours immediately, so two physically adjacent blocks are never both
//!   free
//!
//! # Memory Layout
//!
//! Every block, free or allocated, starts with a two-word header written in
//! the chunk itself. The size is the payload size, excluding the header and
//! rounded up to [`HEAP_ALIGN`]. The owner word holds the id of the heap that
//! handed the block out, or zero while the block is free.
//!
//! ```text
//! Block Layout:
//! ┌──────────────────────────────────┬───────────────────────┐
//! │ Header (HEADER_SIZE bytes)       │ Payload               │
//! │ ┌─────────────┬─────────────────┐│                       │
//! │ │ size: usize │ owner: usize    ││                       │
//! │ └─────────────┴─────────────────┘│                       │
//! └──────────────────────────────────┴───────────────────────┘
//! ```
//!
//! Two blocks are adjacent when they live in the same chunk and
//! `offset + HEADER_SIZE + size` of the first equals the offset of the second.
//!
//! Alignment is a property of offsets within a chunk. A provider that places
//! each chunk on an aligned offset of its own budget, as
//! [`CoreMemory`](crate::core_memory::CoreMemory) does, keeps payloads aligned
//! within that budget as well.
//!
//! # Performance Characteristics
//!
//! - **Allocation**: O(n) where n is the number of free fragments
//! - **Release**: O(log n)
//! - **Memory Overhead**: [`HEADER_SIZE`] bytes per block

use alloc::{boxed::Box, collections::btree_map::BTreeMap, vec::Vec};
use core::{
    fmt,
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::trace;

const WORD: usize = size_of::<usize>();

/// Size of the header prefixed to every block.
pub const HEADER_SIZE: usize = 2 * WORD;

/// Allocation unit. Payload sizes are rounded up to a multiple of this.
pub const HEAP_ALIGN: usize = HEADER_SIZE;

/// Owner word of a block that sits in the free list.
const FREE_OWNER: usize = 0;

/// Identity of a [`Heap`], recorded in every block it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapId(NonZeroUsize);

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl HeapId {
    fn new() -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroUsize::MIN.saturating_add(id))
    }

    fn get(self) -> usize {
        self.0.get()
    }
}

/// Position of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BlockAddr {
    chunk: usize,
    offset: usize,
}

impl BlockAddr {
    /// Address one past the end of a block with `size` payload bytes.
    fn limit(self, size: usize) -> Self {
        Self {
            chunk: self.chunk,
            offset: self.offset + HEADER_SIZE + size,
        }
    }

    fn payload(self) -> usize {
        self.offset + HEADER_SIZE
    }
}

/// An allocated heap block.
///
/// The handle carries the identity of the heap that allocated it and is
/// consumed by [`Heap::free`], so a block cannot be released twice.
#[must_use = "dropping a heap block without freeing it leaks the memory"]
#[derive(Debug, PartialEq, Eq)]
pub struct HeapBlock {
    heap: HeapId,
    addr: BlockAddr,
    size: usize,
}

impl HeapBlock {
    /// Returns the heap this block belongs to.
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    /// Returns the usable payload size, which may exceed the requested size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the offset of the payload within its chunk.
    pub fn offset(&self) -> usize {
        self.addr.payload()
    }
}

/// Free-space statistics of a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStatus {
    /// Number of free fragments.
    pub fragments: usize,
    /// Sum of the payload sizes of all free fragments.
    pub total_free: usize,
    /// Payload size of the largest free fragment.
    pub largest_free: usize,
}

/// A first-fit heap over a set of memory chunks.
///
/// # Thread Safety
///
/// This heap is `Send` but not `Sync`. It requires external synchronization
/// for concurrent access.
#[derive(custom_debug_derive::Debug)]
pub struct Heap {
    id: HeapId,
    #[debug(skip)]
    chunks: Vec<Box<[u8]>>,
    free_list: BTreeMap<BlockAddr, usize>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Creates a heap with no memory.
    ///
    /// Use [`add_region`](Self::add_region) to give it memory, or let it grow
    /// through [`adopt`](Self::adopt).
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: HeapId::new(),
            chunks: Vec::new(),
            free_list: BTreeMap::new(),
        }
    }

    /// Creates a heap managing `storage`.
    #[must_use]
    pub fn with_region(storage: Box<[u8]>) -> Self {
        let mut heap = Self::new();
        heap.add_region(storage);
        heap
    }

    #[must_use]
    pub fn id(&self) -> HeapId {
        self.id
    }

    /// Adds a memory region to the heap as a single free block.
    ///
    /// The region is truncated to a multiple of [`HEAP_ALIGN`]. Regions too
    /// small to hold a header and one allocation unit are ignored.
    pub fn add_region(&mut self, storage: Box<[u8]>) {
        let usable = storage.len() / HEAP_ALIGN * HEAP_ALIGN;
        if usable < HEADER_SIZE + HEAP_ALIGN {
            return;
        }

        let addr = self.push_chunk(storage);
        let size = usable - HEADER_SIZE;
        write_header(&mut self.chunks, addr, size, FREE_OWNER);
        self.free_list.insert(addr, size);
        trace!("heap {}: added region of {usable} bytes", self.id);
    }

    /// Allocates a block with at least `size` payload bytes from the free
    /// list.
    ///
    /// Returns `None` if no free block is large enough. The heap never grows
    /// by itself; see [`adopt`](Self::adopt).
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn try_allocate(&mut self, size: usize) -> Option<HeapBlock> {
        self.try_allocate_aligned(size, HEAP_ALIGN)
    }

    /// Allocates a block with at least `size` payload bytes whose payload
    /// offset is a multiple of `align`.
    ///
    /// Alignments below [`HEAP_ALIGN`] are raised to it.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `align` is not a power of two.
    pub fn try_allocate_aligned(&mut self, size: usize, align: usize) -> Option<HeapBlock> {
        assert!(size > 0, "heap allocation size must be non-zero");
        assert!(align.is_power_of_two(), "invalid alignment {align}");
        let align = align.max(HEAP_ALIGN);
        let size = size.checked_next_multiple_of(HEAP_ALIGN)?;

        let (addr, block_size, gap) =
            self.free_list.iter().find_map(|(&addr, &block_size)| {
                let gap = aligned_gap(addr.payload(), align)?;
                (block_size >= gap.checked_add(size)?).then_some((addr, block_size, gap))
            })?;
        self.free_list.remove(&addr);
        Some(self.carve(addr, block_size, gap, size))
    }

    /// Number of bytes a fresh region needs to hold one block of `size`
    /// payload bytes aligned to `align`.
    ///
    /// Growth callers ask their provider for this much and pass the region to
    /// [`adopt_aligned`](Self::adopt_aligned).
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    pub fn region_size(size: usize, align: usize) -> Option<usize> {
        assert!(align.is_power_of_two(), "invalid alignment {align}");
        let size = size.checked_next_multiple_of(HEAP_ALIGN)?;
        let gap = aligned_gap(HEADER_SIZE, align.max(HEAP_ALIGN))?;
        gap.checked_add(HEADER_SIZE)?.checked_add(size)
    }

    /// Takes ownership of a region obtained from a growth provider and returns
    /// a block of at least `size` payload bytes carved from it.
    ///
    /// Any surplus joins this heap's free list, and so does the block once it
    /// is freed.
    ///
    /// # Panics
    ///
    /// Panics if `storage` cannot hold a header and `size` payload bytes.
    pub fn adopt(&mut self, storage: Box<[u8]>, size: usize) -> HeapBlock {
        self.adopt_aligned(storage, size, HEAP_ALIGN)
    }

    /// Like [`adopt`](Self::adopt), with the payload offset a multiple of
    /// `align`.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is smaller than
    /// [`region_size(size, align)`](Self::region_size) or `align` is not a
    /// power of two.
    pub fn adopt_aligned(&mut self, storage: Box<[u8]>, size: usize, align: usize) -> HeapBlock {
        let usable = storage.len() / HEAP_ALIGN * HEAP_ALIGN;
        let Some(needed) = Self::region_size(size, align).filter(|&needed| usable >= needed) else {
            panic!(
                "provided region of {} bytes cannot hold a {size} byte block",
                storage.len()
            );
        };

        let size = size.next_multiple_of(HEAP_ALIGN);
        let gap = needed - HEADER_SIZE - size;
        let addr = self.push_chunk(storage);
        let block = self.carve(addr, usable - HEADER_SIZE, gap, size);
        trace!("heap {}: adopted a {} byte block", self.id, block.size);
        block
    }

    /// Returns a block to the free list, merging it with the free blocks
    /// physically before and after it.
    ///
    /// # Panics
    ///
    /// Panics if the block belongs to another heap or its header was
    /// overwritten.
    pub fn free(&mut self, block: HeapBlock) {
        assert_eq!(
            block.heap, self.id,
            "block of heap {} freed into heap {}",
            block.heap, self.id
        );
        let (size, owner) = read_header(&self.chunks, block.addr);
        assert!(
            owner == self.id.get() && size == block.size,
            "heap {}: corrupted block header at {:?}",
            self.id,
            block.addr
        );

        self.insert_free(block.addr, block.size);
    }

    /// Returns the free-space statistics of the heap.
    #[must_use]
    pub fn status(&self) -> HeapStatus {
        self.free_list
            .values()
            .fold(HeapStatus::default(), |status, &size| HeapStatus {
                fragments: status.fragments + 1,
                total_free: status.total_free + size,
                largest_free: status.largest_free.max(size),
            })
    }

    /// Returns the payload of an allocated block.
    ///
    /// # Panics
    ///
    /// Panics if the block belongs to another heap.
    #[must_use]
    pub fn payload(&self, block: &HeapBlock) -> &[u8] {
        assert_eq!(block.heap, self.id, "block belongs to another heap");
        let start = block.addr.payload();
        &self.chunks[block.addr.chunk][start..start + block.size]
    }

    /// Returns the payload of an allocated block for writing.
    ///
    /// # Panics
    ///
    /// Panics if the block belongs to another heap.
    pub fn payload_mut(&mut self, block: &HeapBlock) -> &mut [u8] {
        assert_eq!(block.heap, self.id, "block belongs to another heap");
        let start = block.addr.payload();
        &mut self.chunks[block.addr.chunk][start..start + block.size]
    }

    /// Hands out `size` bytes of the detached free block at `addr`, starting
    /// `gap` bytes into its payload. The leading gap and any useful tail go
    /// back into the free list.
    fn carve(&mut self, addr: BlockAddr, block_size: usize, gap: usize, size: usize) -> HeapBlock {
        let (addr, block_size) = if gap == 0 {
            (addr, block_size)
        } else {
            let lead = gap - HEADER_SIZE;
            write_header(&mut self.chunks, addr, lead, FREE_OWNER);
            self.free_list.insert(addr, lead);
            (addr.limit(lead), block_size - gap)
        };

        let size = if block_size - size <= HEADER_SIZE {
            // The tail could not hold anything useful, hand out the whole block.
            block_size
        } else {
            let rest = addr.limit(size);
            let rest_size = block_size - size - HEADER_SIZE;
            write_header(&mut self.chunks, rest, rest_size, FREE_OWNER);
            self.free_list.insert(rest, rest_size);
            size
        };

        write_header(&mut self.chunks, addr, size, self.id.get());
        HeapBlock {
            heap: self.id,
            addr,
            size,
        }
    }

    fn push_chunk(&mut self, storage: Box<[u8]>) -> BlockAddr {
        self.chunks.push(storage);
        BlockAddr {
            chunk: self.chunks.len() - 1,
            offset: 0,
        }
    }

    /// Inserts a block into the free list and coalesces it with its
    /// neighbours.
    fn insert_free(&mut self, addr: BlockAddr, size: usize) {
        let mut size = size;

        if let Some((&next, &next_size)) = self.free_list.range(addr..).next()
            && next == addr.limit(size)
        {
            self.free_list.remove(&next);
            size += HEADER_SIZE + next_size;
        }

        if let Some((&prev, prev_size)) = self.free_list.range_mut(..addr).next_back()
            && prev.limit(*prev_size) == addr
        {
            *prev_size += HEADER_SIZE + size;
            let merged = *prev_size;
            write_header(&mut self.chunks, prev, merged, FREE_OWNER);
            return;
        }

        write_header(&mut self.chunks, addr, size, FREE_OWNER);
        self.free_list.insert(addr, size);
    }
}

/// Distance from the payload offset `start` to the first offset aligned to
/// `align` that leaves either no gap or a gap able to hold a free block.
fn aligned_gap(start: usize, align: usize) -> Option<usize> {
    let mut payload = start.checked_next_multiple_of(align)?;
    if payload != start && payload - start < HEADER_SIZE + HEAP_ALIGN {
        payload = payload.checked_add(align)?;
    }
    Some(payload - start)
}

fn write_header(chunks: &mut [Box<[u8]>], addr: BlockAddr, size: usize, owner: usize) {
    let header = &mut chunks[addr.chunk][addr.offset..addr.offset + HEADER_SIZE];
    let (size_word, owner_word) = header.split_at_mut(WORD);
    size_word.copy_from_slice(&size.to_ne_bytes());
    owner_word.copy_from_slice(&owner.to_ne_bytes());
}

fn read_header(chunks: &[Box<[u8]>], addr: BlockAddr) -> (usize, usize) {
    let header = &chunks[addr.chunk][addr.offset..addr.offset + HEADER_SIZE];
    let (size_word, owner_word) = header.split_at(WORD);
    (read_word(size_word), read_word(owner_word))
}

fn read_word(bytes: &[u8]) -> usize {
    let mut word = [0; WORD];
    word.copy_from_slice(bytes);
    usize::from_ne_bytes(word)
}
