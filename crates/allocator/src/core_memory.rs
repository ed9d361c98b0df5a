//! Core memory allocator.
//!
//! [`CoreMemory`] accounts for a fixed budget of memory handed out in
//! increasing order and never returned. It is lock-free: the allocation
//! cursor is a single atomic, so it can be used from any context.
//!
//! Heaps and pools use it as their default [`MemoryProvider`].

use alloc::{boxed::Box, vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::MemoryProvider;

#[derive(Debug)]
pub struct CoreMemory {
    size: usize,
    next: AtomicUsize,
}

impl CoreMemory {
    /// Creates a core allocator with a budget of `size` bytes.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            next: AtomicUsize::new(0),
        }
    }

    /// Total budget in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes not yet handed out.
    #[must_use]
    pub fn unused(&self) -> usize {
        self.size - self.next.load(Ordering::Acquire)
    }

    /// Allocates `size` zeroed bytes starting at an `align` boundary of the
    /// budget.
    ///
    /// Returns `None` once the budget is exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn allocate(&self, size: usize, align: usize) -> Option<Box<[u8]>> {
        assert!(align.is_power_of_two(), "invalid alignment {align}");

        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let start = current.checked_next_multiple_of(align)?;
            let end = start.checked_add(size).filter(|&end| end <= self.size);
            let Some(end) = end else {
                debug!(
                    "core memory exhausted: {size} bytes requested, {} unused",
                    self.size - current
                );
                return None;
            };

            match self.next.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(vec![0; size].into_boxed_slice()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl MemoryProvider for CoreMemory {
    fn provide(&self, size: usize, align: usize) -> Option<Box<[u8]>> {
        self.allocate(size, align)
    }
}
