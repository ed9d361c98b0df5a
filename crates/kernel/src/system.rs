//! Kernel state built at boot.
//!
//! [`System`] owns the timer service, the core allocator and the default
//! heap. The port creates it once during start-up and hands references to
//! whatever needs them; nothing here is a global.

use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};

use log::info;
use spin::Mutex;

use crate::{
    config::{Config, ConfigError},
    lock::Locked,
    memory::{CoreMemory, GuardedPool, HeapArena, HeapBlock, MemoryProvider, Pool},
    sync::semaphore::Semaphore,
    time::SysTime,
    vt::{Clock, Timers},
};

#[derive(Debug)]
pub struct System {
    config: Config,
    timers: Arc<Timers>,
    core: Arc<CoreMemory>,
    heap: Arc<HeapArena>,
    arenas: Mutex<Vec<Weak<HeapArena>>>,
}

impl System {
    /// Validates `config` and brings up the timers and memory managers.
    pub fn new(config: Config, clock: Clock) -> Result<Self, ConfigError> {
        config.validate(&clock)?;
        info!(
            "kernel core: {} Hz, {} clock, {} bytes of core memory",
            config.tick_frequency,
            if matches!(clock, Clock::Tickless(_)) {
                "tick-less"
            } else {
                "periodic"
            },
            config.core_memory_size,
        );

        let timers = Arc::new(Timers::new(clock, config.min_delta));
        let core = Arc::new(CoreMemory::new(config.core_memory_size));
        let heap = Arc::new(HeapArena::new(Some(Self::provider(&core))));
        let arenas = Mutex::new(alloc::vec![Arc::downgrade(&heap)]);
        Ok(Self {
            config,
            timers,
            core,
            heap,
            arenas,
        })
    }

    fn provider(core: &Arc<CoreMemory>) -> Arc<dyn MemoryProvider> {
        Arc::clone(core) as Arc<dyn MemoryProvider>
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn timers(&self) -> &Arc<Timers> {
        &self.timers
    }

    #[must_use]
    pub fn core_memory(&self) -> &Arc<CoreMemory> {
        &self.core
    }

    /// The default heap, grown from core memory.
    #[must_use]
    pub fn heap(&self) -> &Arc<HeapArena> {
        &self.heap
    }

    /// Reads the system time.
    pub fn now(&self, cs: &Locked<'_>) -> SysTime {
        self.timers.now(cs)
    }

    /// Creates another heap arena that grows from core memory.
    ///
    /// Blocks of the new arena can be released with [`System::free`].
    #[must_use]
    pub fn new_heap(&self) -> Arc<HeapArena> {
        let heap = Arc::new(HeapArena::new(Some(Self::provider(&self.core))));
        let mut arenas = self.arenas.lock();
        arenas.retain(|arena| arena.strong_count() > 0);
        arenas.push(Arc::downgrade(&heap));
        heap
    }

    /// Allocates from the default heap.
    pub fn alloc(&self, size: usize) -> Option<HeapBlock> {
        self.heap.alloc(size)
    }

    /// Returns a block to the arena it was allocated from.
    ///
    /// # Panics
    ///
    /// Panics if the block's arena was not created by this system or has
    /// already been dropped.
    pub fn free(&self, block: HeapBlock) {
        let arena = self
            .arenas
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|arena| arena.id() == block.heap());
        let Some(arena) = arena else {
            panic!("heap {} is not managed by this system", block.heap());
        };
        arena.free(block);
    }

    /// Creates a pool that grows from core memory.
    ///
    /// # Panics
    ///
    /// Panics on an invalid object size or alignment, see [`Pool::new`].
    #[must_use]
    pub fn new_pool(&self, object_size: usize, align: usize) -> Pool {
        Pool::new(object_size, align, Some(Self::provider(&self.core)))
    }

    /// Creates an empty guarded pool timed by the system timers.
    ///
    /// # Panics
    ///
    /// Panics on an invalid object size or alignment, see
    /// [`GuardedPool::new`].
    #[must_use]
    pub fn new_guarded_pool(&self, object_size: usize, align: usize) -> GuardedPool {
        GuardedPool::new(Arc::clone(&self.timers), object_size, align)
    }

    #[must_use]
    pub fn new_semaphore(&self, count: usize) -> Semaphore {
        Semaphore::new(Arc::clone(&self.timers), count)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, vec};

    use super::*;
    use crate::{
        lock::with_lock,
        time::{Interval, Timeout},
        vt::ManualAlarm,
    };

    fn system() -> System {
        System::new(Config::DEFAULT, Clock::Periodic).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = Config {
            tick_frequency: 0,
            ..Config::DEFAULT
        };
        assert!(matches!(
            System::new(config, Clock::Periodic),
            Err(ConfigError::ZeroTickFrequency { .. })
        ));
    }

    #[test]
    fn test_default_heap_grows_from_core_memory() {
        let system = system();
        let unused = system.core_memory().unused();
        let block = system.alloc(100).unwrap();
        assert!(system.core_memory().unused() < unused);
        system.free(block);
        assert_eq!(system.heap().status().fragments, 1);
    }

    #[test]
    fn test_free_routes_to_owning_heap() {
        let system = system();
        let extra = system.new_heap();
        extra.add_region(vec![0; 512].into_boxed_slice());

        let block = extra.alloc(64).unwrap();
        let before = extra.status().total_free;
        system.free(block);
        assert!(extra.status().total_free > before);
    }

    #[test]
    #[should_panic(expected = "is not managed by this system")]
    fn test_free_from_foreign_heap() {
        let system = system();
        let foreign = HeapArena::with_region(vec![0; 256].into_boxed_slice(), None);
        let block = foreign.alloc(16).unwrap();
        system.free(block);
    }

    #[test]
    fn test_pools_share_core_memory() {
        let config = Config {
            core_memory_size: 64,
            ..Config::DEFAULT
        };
        let system = System::new(config, Clock::Periodic).unwrap();
        let pool = system.new_pool(32, 8);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert!(system.alloc(8).is_none());
        with_lock(|cs| {
            pool.free(cs, a);
            pool.free(cs, b);
            assert_eq!(pool.free_count(cs), 2);
        });
    }

    #[test]
    fn test_guarded_pool_and_semaphore_use_system_timers() {
        let system = system();
        let pool = system.new_guarded_pool(8, 8);
        with_lock(|cs| pool.add(cs, vec![0; 8].into_boxed_slice()));
        let object = pool.alloc_timeout(Timeout::Immediate).unwrap();
        with_lock(|cs| pool.free(cs, object));

        let sem = system.new_semaphore(1);
        sem.wait(Timeout::Immediate).unwrap();
    }

    #[test]
    fn test_tickless_system_time() {
        let alarm = ManualAlarm::new(SysTime::from_ticks(40));
        let system = System::new(Config::DEFAULT, Clock::Tickless(Box::new(alarm.clone()))).unwrap();
        assert_eq!(with_lock(|cs| system.now(cs)), SysTime::from_ticks(40));
        alarm.advance(Interval::from_ticks(5));
        with_lock(|cs| {
            assert_eq!(system.now(cs), SysTime::from_ticks(45));
            assert_eq!(system.timers().elapsed_since(cs, SysTime::from_ticks(40)).ticks(), 5);
        });
    }
}
