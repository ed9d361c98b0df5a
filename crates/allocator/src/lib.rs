//! Memory managers for the kernel's time-and-memory core.
//!
//! This crate provides the allocators every other kernel facility is built
//! on. All of them are `no_std` compatible and never reinterpret user memory
//! as allocator metadata: free lists are kept beside the memory they manage,
//! and allocations are represented by move-only handles.
//!
//! # Available Allocators
//!
//! ## [`Heap`](heap::Heap)
//!
//! A general-purpose first-fit allocator over one or more memory chunks. Best
//! suited for:
//!
//! - Variable-sized allocations
//! - Long-lived kernel objects created at start-up
//!
//! **Performance**: O(n) allocation and O(log n) release where n is the number of
//! free fragments.
//!
//! ## [`MemoryPool`](pool::MemoryPool)
//!
//! A fixed-size object allocator. Best suited for:
//!
//! - Objects of a single size allocated and released at a high rate
//! - Code paths that must run in bounded time, including interrupt handlers
//!
//! **Performance**: O(1) allocation and release.
//!
//! ## [`CoreMemory`](core_memory::CoreMemory)
//!
//! A bump allocator over a fixed budget that never frees. It is the default
//! [`MemoryProvider`] used by heaps and pools to grow on demand.
//!
//! # Usage Examples
//!
//! ```rust
//! use allocator::heap::Heap;
//!
//! let mut heap = Heap::new();
//! heap.add_region(vec![0u8; 1024].into_boxed_slice());
//!
//! let block = heap.try_allocate(64).unwrap();
//! heap.payload_mut(&block).fill(0xaa);
//! heap.free(block);
//!
//! assert_eq!(heap.status().fragments, 1);
//! ```
//!
//! ```rust
//! use allocator::pool::MemoryPool;
//!
//! let mut pool = MemoryPool::new(8, 8);
//! pool.load(vec![0u8; 32].into_boxed_slice(), 4);
//!
//! let obj = pool.alloc().unwrap();
//! pool.object_mut(&obj).copy_from_slice(&42u64.to_ne_bytes());
//! pool.free(obj);
//! ```
//!
//! # Thread Safety
//!
//! The allocators take `&mut self` and are `Send` but require external
//! synchronization for concurrent access. The `kernel` crate wraps them in
//! locks and calls the growth provider with the lock released.
//!
//! | Allocator | Allocation | Release | Overhead | Best Use Case |
//! |-----------|------------|---------|----------|---------------|
//! | `Heap` | O(n) | O(log n) | 2 words/block | General purpose |
//! | `MemoryPool` | O(1) | O(1) | 2 words/free object | Fixed-size objects |
//! | `CoreMemory` | O(1) | - | alignment padding | Growth provider |

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::boxed::Box;

pub mod core_memory;
pub mod heap;
pub mod pool;

/// A source of fresh backing memory for growing allocators.
///
/// Providers are called when an allocator's free list cannot satisfy a
/// request. They are always invoked without the requesting allocator's lock
/// held, so they may block or take their own locks.
pub trait MemoryProvider: Send + Sync {
    /// Returns a zero-initialized region of at least `size` bytes, or `None`
    /// if no memory is left.
    ///
    /// Allocators address their memory by offset, so `align` constrains the
    /// region's offset within the provider's budget, not the address of the
    /// returned slice. Callers that need aligned payloads place them on
    /// aligned offsets inside the region.
    fn provide(&self, size: usize, align: usize) -> Option<Box<[u8]>>;
}

impl<F> MemoryProvider for F
where
    F: Fn(usize, usize) -> Option<Box<[u8]>> + Send + Sync,
{
    fn provide(&self, size: usize, align: usize) -> Option<Box<[u8]>> {
        self(size, align)
    }
}
