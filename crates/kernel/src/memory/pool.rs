use alloc::{boxed::Box, sync::Arc};

use allocator::{
    MemoryProvider,
    pool::{MemoryPool, PoolId, PoolObject},
};
use log::debug;

use crate::{
    lock::{self, LockCell, Locked},
    sync::semaphore::{Semaphore, WaitError},
    time::Timeout,
    vt::Timers,
};

/// A fixed-size object pool kept under the system lock, with an optional
/// growth provider.
///
/// Operations taking a [`Locked`] token only touch the free stack, so they
/// are usable from interrupt handlers and timer callbacks. [`Pool::alloc`]
/// may call the provider and must run in thread context.
#[derive(custom_debug_derive::Debug)]
pub struct Pool {
    id: PoolId,
    pool: LockCell<MemoryPool>,
    #[debug(skip)]
    provider: Option<Arc<dyn MemoryProvider>>,
}

impl Pool {
    /// Creates an empty pool.
    ///
    /// # Panics
    ///
    /// Panics if `object_size` is smaller than a machine word, or `align` is
    /// not a power of two at least as large as the natural alignment.
    #[must_use]
    pub fn new(
        object_size: usize,
        align: usize,
        provider: Option<Arc<dyn MemoryProvider>>,
    ) -> Self {
        let pool = MemoryPool::new(object_size, align);
        Self {
            id: pool.id(),
            pool: LockCell::new(pool),
            provider,
        }
    }

    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Adds `count` contiguous objects laid out in `storage`.
    pub fn load(&self, cs: &mut Locked<'_>, storage: Box<[u8]>, count: usize) {
        self.pool.borrow_mut(cs).load(storage, count);
    }

    /// Adds a single object.
    pub fn add(&self, cs: &mut Locked<'_>, storage: Box<[u8]>) {
        self.pool.borrow_mut(cs).add(storage);
    }

    /// Pops an object from the free stack without growing the pool.
    pub fn try_alloc(&self, cs: &mut Locked<'_>) -> Option<PoolObject> {
        self.pool.borrow_mut(cs).alloc()
    }

    /// Allocates an object.
    ///
    /// When the pool is empty the object comes straight from the growth
    /// provider, if there is one. Must not be called with the system lock
    /// held.
    pub fn alloc(&self) -> Option<PoolObject> {
        let (size, align) = {
            let mut cs = lock::lock();
            if let Some(object) = self.try_alloc(&mut cs) {
                return Some(object);
            }
            let pool = self.pool.borrow(&cs);
            (pool.object_size(), pool.align())
        };

        let provider = self.provider.as_ref()?;
        let Some(storage) = provider.provide(size, align) else {
            debug!("pool {}: growth provider exhausted", self.id);
            return None;
        };
        Some(lock::with_lock(|cs| self.pool.borrow_mut(cs).adopt(storage)))
    }

    /// Returns an object to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the object belongs to another pool.
    pub fn free(&self, cs: &mut Locked<'_>, object: PoolObject) {
        self.pool.borrow_mut(cs).free(object);
    }

    pub fn free_count(&self, cs: &Locked<'_>) -> usize {
        self.pool.borrow(cs).free_count()
    }

    pub fn object<'a>(&'a self, cs: &'a Locked<'_>, object: &PoolObject) -> &'a [u8] {
        self.pool.borrow(cs).object(object)
    }

    pub fn object_mut<'a>(&'a self, cs: &'a mut Locked<'_>, object: &PoolObject) -> &'a mut [u8] {
        self.pool.borrow_mut(cs).object_mut(object)
    }
}

/// A pool whose allocations can wait for an object to be freed.
///
/// A semaphore counts the free objects. Guarded pools have no growth
/// provider, which would let the two counts drift apart.
#[derive(Debug)]
pub struct GuardedPool {
    id: PoolId,
    pool: LockCell<MemoryPool>,
    free: Semaphore,
}

impl GuardedPool {
    /// Creates an empty guarded pool. Waits are timed with `timers`.
    ///
    /// # Panics
    ///
    /// Panics if `object_size` is smaller than a machine word, or `align` is
    /// not a power of two at least as large as the natural alignment.
    #[must_use]
    pub fn new(timers: Arc<Timers>, object_size: usize, align: usize) -> Self {
        let pool = MemoryPool::new(object_size, align);
        Self {
            id: pool.id(),
            pool: LockCell::new(pool),
            free: Semaphore::new(timers, 0),
        }
    }

    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Adds `count` contiguous objects laid out in `storage`, waking up to
    /// `count` waiters.
    pub fn load(&self, cs: &mut Locked<'_>, storage: Box<[u8]>, count: usize) {
        self.pool.borrow_mut(cs).load(storage, count);
        for _ in 0..count {
            self.free.signal(cs);
        }
    }

    /// Adds a single object, waking one waiter.
    pub fn add(&self, cs: &mut Locked<'_>, storage: Box<[u8]>) {
        self.load(cs, storage, 1);
    }

    /// Allocates an object, waiting up to `timeout` for one to be freed.
    ///
    /// Must not be called with the system lock held.
    #[track_caller]
    pub fn alloc_timeout(&self, timeout: Timeout) -> Result<PoolObject, WaitError> {
        self.free.wait(timeout)?;
        let object = lock::with_lock(|cs| self.pool.borrow_mut(cs).alloc());
        let Some(object) = object else {
            unreachable!("guarded pool {}: semaphore count exceeds free objects", self.id);
        };
        Ok(object)
    }

    /// Allocates an object if one is free, without waiting.
    pub fn try_alloc(&self, cs: &mut Locked<'_>) -> Option<PoolObject> {
        if !self.free.try_wait(cs) {
            return None;
        }
        self.pool.borrow_mut(cs).alloc()
    }

    /// Returns an object to the pool and wakes the oldest waiter.
    ///
    /// # Panics
    ///
    /// Panics if the object belongs to another pool.
    pub fn free(&self, cs: &mut Locked<'_>, object: PoolObject) {
        self.pool.borrow_mut(cs).free(object);
        self.free.signal(cs);
    }

    /// Number of objects available to allocators.
    pub fn free_count(&self, cs: &Locked<'_>) -> usize {
        self.free.count(cs)
    }

    pub fn object<'a>(&'a self, cs: &'a Locked<'_>, object: &PoolObject) -> &'a [u8] {
        self.pool.borrow(cs).object(object)
    }

    pub fn object_mut<'a>(&'a self, cs: &'a mut Locked<'_>, object: &PoolObject) -> &'a mut [u8] {
        self.pool.borrow_mut(cs).object_mut(object)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::vec;
    use std::{
        sync::Mutex,
        thread,
        time::Duration,
    };

    use allocator::core_memory::CoreMemory;

    use super::*;
    use crate::{
        lock::with_lock,
        time::Interval,
        vt::{Clock, Timers},
    };

    fn timers() -> Arc<Timers> {
        Arc::new(Timers::new(Clock::Periodic, Interval::from_ticks(2)))
    }

    fn guarded(count: usize) -> Arc<GuardedPool> {
        let pool = Arc::new(GuardedPool::new(timers(), 8, 8));
        with_lock(|cs| pool.load(cs, vec![0; 8 * count].into_boxed_slice(), count));
        pool
    }

    #[test]
    fn test_pool_of_four() {
        let pool = Pool::new(8, 8, None);
        with_lock(|cs| pool.load(cs, vec![0; 32].into_boxed_slice(), 4));

        let mut objects: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
        assert!(pool.alloc().is_none());

        let freed = objects.pop().unwrap();
        let slot = freed.slot();
        with_lock(|cs| pool.free(cs, freed));
        let again = pool.alloc().unwrap();
        assert_eq!(again.slot(), slot);

        with_lock(|cs| {
            pool.free(cs, again);
            for object in objects {
                pool.free(cs, object);
            }
            assert_eq!(pool.free_count(cs), 4);
        });
    }

    #[test]
    fn test_pool_grows_from_provider() {
        let core = Arc::new(CoreMemory::new(32));
        let pool = Pool::new(16, 8, Some(Arc::clone(&core) as Arc<dyn MemoryProvider>));
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert_eq!(core.unused(), 0);

        with_lock(|cs| {
            // Growing is a thread-context operation only.
            assert!(pool.try_alloc(cs).is_none());

            pool.object_mut(cs, &a).fill(1);
            assert!(pool.object(cs, &b).iter().all(|&x| x == 0));
            pool.free(cs, a);
            pool.free(cs, b);
            assert_eq!(pool.free_count(cs), 2);
        });
    }

    #[test]
    fn test_pool_used_from_timer_callback() {
        let timers = timers();
        let pool = Arc::new(Pool::new(8, 8, None));
        with_lock(|cs| pool.load(cs, vec![0; 16].into_boxed_slice(), 2));
        let taken = Arc::new(Mutex::new(Vec::new()));

        with_lock(|cs| {
            let id = timers.create(cs);
            let pool = Arc::clone(&pool);
            let taken = Arc::clone(&taken);
            timers.arm(cs, id, Interval::from_ticks(2), move |_, cs, _| {
                let object = pool.try_alloc(cs).unwrap();
                pool.object_mut(cs, &object).fill(9);
                taken.lock().unwrap().push(object);
            });
        });
        for _ in 0..2 {
            with_lock(|cs| timers.tick(cs));
        }

        let object = taken.lock().unwrap().pop().unwrap();
        with_lock(|cs| {
            assert_eq!(pool.free_count(cs), 1);
            assert!(pool.object(cs, &object).iter().all(|&x| x == 9));
            pool.free(cs, object);
            assert_eq!(pool.free_count(cs), 2);
        });
    }

    #[test]
    fn test_guarded_immediate_on_empty_pool() {
        let pool = guarded(1);
        let object = pool.alloc_timeout(Timeout::Immediate).unwrap();
        assert!(matches!(
            pool.alloc_timeout(Timeout::Immediate),
            Err(WaitError::Timeout { .. })
        ));
        with_lock(|cs| {
            assert!(pool.try_alloc(cs).is_none());
            pool.free(cs, object);
            assert_eq!(pool.free_count(cs), 1);
        });
    }

    #[test]
    fn test_guarded_free_from_timer_callback_wakes_waiter() {
        let timers = timers();
        let pool = Arc::new(GuardedPool::new(Arc::clone(&timers), 8, 8));
        with_lock(|cs| pool.load(cs, vec![0; 8].into_boxed_slice(), 1));
        let held = with_lock(|cs| pool.try_alloc(cs)).unwrap();
        let slot = held.slot();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.alloc_timeout(Timeout::Infinite))
        };
        while with_lock(|cs| pool.free.waiting(cs)) == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let held = Mutex::new(Some(held));
        with_lock(|cs| {
            let id = timers.create(cs);
            let pool = Arc::clone(&pool);
            timers.arm(cs, id, Interval::from_ticks(2), move |_, cs, _| {
                if let Some(object) = held.lock().unwrap().take() {
                    pool.free(cs, object);
                }
            });
        });
        for _ in 0..2 {
            with_lock(|cs| timers.tick(cs));
        }

        let object = waiter.join().unwrap().unwrap();
        assert_eq!(object.slot(), slot);
        with_lock(|cs| pool.free(cs, object));
    }

    #[test]
    fn test_guarded_waiter_released_by_free() {
        let pool = guarded(1);
        let held = pool.alloc_timeout(Timeout::Infinite).unwrap();
        let slot = held.slot();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.alloc_timeout(Timeout::Infinite))
        };
        while with_lock(|cs| pool.free.waiting(cs)) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!waiter.is_finished());

        with_lock(|cs| pool.free(cs, held));
        let object = waiter.join().unwrap().unwrap();
        assert_eq!(object.slot(), slot);
        with_lock(|cs| pool.free(cs, object));
    }

    #[test]
    fn test_guarded_wait_times_out() {
        let timers = timers();
        let pool = Arc::new(GuardedPool::new(Arc::clone(&timers), 8, 8));
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.alloc_timeout(Timeout::Ticks(Interval::from_ticks(3))))
        };
        while with_lock(|cs| pool.free.waiting(cs)) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..3 {
            with_lock(|cs| timers.tick(cs));
        }
        assert!(matches!(
            waiter.join().unwrap(),
            Err(WaitError::Timeout { .. })
        ));

        // An object added afterwards is still counted.
        with_lock(|cs| {
            pool.add(cs, vec![0; 8].into_boxed_slice());
            assert_eq!(pool.free_count(cs), 1);
        });
    }
}
