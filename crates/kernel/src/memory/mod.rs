//! Locked memory managers.
//!
//! The allocators of the `allocator` crate wrapped for shared use. Each heap
//! arena and each pool has its own lock, held only while its free list is
//! touched. Growth providers are always called with that lock released.

pub use allocator::{
    MemoryProvider,
    core_memory::CoreMemory,
    heap::{HEADER_SIZE, HEAP_ALIGN, HeapBlock, HeapId, HeapStatus},
    pool::{PoolId, PoolObject},
};

pub use self::{
    heap::HeapArena,
    pool::{GuardedPool, Pool},
};

mod heap;
mod pool;
