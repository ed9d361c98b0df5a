//! Synchronization primitives built on the system lock.

pub mod semaphore;
