//! The system lock.
//!
//! Every kernel structure shared between thread context and interrupt context
//! lives in a [`LockCell`]. The cells can only be accessed through a
//! [`Locked`] token, which exists only while the single process-wide system
//! lock is held. Functions that must be called "from inside a locked region"
//! take `&mut Locked` as a parameter; everything else acquires the lock
//! itself with [`lock`] or [`with_lock`].
//!
//! On a port with interrupts, the port registers [`InterruptControl`] at
//! boot. Interrupts then stay masked while the lock is held, so an interrupt
//! handler that takes the lock never spins on a holder it preempted.

use core::{
    cell::UnsafeCell,
    fmt, hint,
    marker::PhantomData,
    panic::Location,
    sync::atomic::{AtomicBool, Ordering},
};

use spin::Once;

static SYSTEM_LOCK: SystemLock = SystemLock::new();
static INTERRUPT_CONTROL: Once<InterruptControl> = Once::new();

/// Port hooks for masking interrupts on the current CPU.
#[derive(Debug, Clone, Copy)]
pub struct InterruptControl {
    /// Disables interrupts and returns whether they were enabled.
    pub disable: fn() -> bool,
    /// Restores the state returned by `disable`.
    pub restore: fn(bool),
}

/// Registers the port's interrupt hooks.
///
/// Only the first call has any effect. Hosted builds never call this and run
/// with the hooks unset.
pub fn set_interrupt_control(control: InterruptControl) {
    INTERRUPT_CONTROL.call_once(|| control);
}

#[derive(Debug)]
struct InterruptGuard {
    were_enabled: Option<bool>,
}

impl InterruptGuard {
    fn disable() -> Self {
        Self {
            were_enabled: INTERRUPT_CONTROL.get().map(|control| (control.disable)()),
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let (Some(control), Some(were_enabled)) = (INTERRUPT_CONTROL.get(), self.were_enabled) {
            (control.restore)(were_enabled);
        }
    }
}

struct SystemLock {
    locked: AtomicBool,
    locked_at: UnsafeCell<&'static Location<'static>>,
}

unsafe impl Sync for SystemLock {}

impl SystemLock {
    #[track_caller]
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            locked_at: UnsafeCell::new(Location::caller()),
        }
    }

    #[track_caller]
    fn acquire(&self) -> Locked<'_> {
        let interrupt_guard = InterruptGuard::disable();
        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }
        self.remember_caller(interrupt_guard)
    }

    #[track_caller]
    fn try_acquire(&self) -> Option<Locked<'_>> {
        let interrupt_guard = InterruptGuard::disable();
        if self.locked.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(self.remember_caller(interrupt_guard))
    }

    #[track_caller]
    fn remember_caller(&self, interrupt_guard: InterruptGuard) -> Locked<'_> {
        unsafe {
            *self.locked_at.get() = Location::caller();
        }
        Locked {
            lock: self,
            _interrupt_guard: interrupt_guard,
            _not_send: PhantomData,
        }
    }
}

/// Proof that the system lock is held.
///
/// Dropping the token releases the lock. The token cannot leave the thread
/// that acquired it. Interrupts masked on acquisition are restored after
/// the lock is released.
pub struct Locked<'a> {
    lock: &'a SystemLock,
    _interrupt_guard: InterruptGuard,
    _not_send: PhantomData<*mut ()>,
}

impl fmt::Debug for Locked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locked")
            .field("locked_at", &self.locked_at())
            .finish()
    }
}

impl Drop for Locked<'_> {
    fn drop(&mut self) {
        assert!(
            self.lock.locked.load(Ordering::Relaxed),
            "Locked dropped without holding the lock"
        );
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl Locked<'_> {
    /// Returns the call site that acquired the lock.
    #[must_use]
    pub fn locked_at(&self) -> &'static Location<'static> {
        unsafe { *self.lock.locked_at.get() }
    }

    pub fn unlock(self) {
        let _ = self; // drop
    }
}

/// Acquires the system lock, spinning until it is available.
#[track_caller]
pub fn lock() -> Locked<'static> {
    SYSTEM_LOCK.acquire()
}

/// Acquires the system lock if nobody holds it.
#[track_caller]
pub fn try_lock() -> Option<Locked<'static>> {
    SYSTEM_LOCK.try_acquire()
}

/// Runs `f` with the system lock held.
#[track_caller]
pub fn with_lock<F, R>(f: F) -> R
where
    F: FnOnce(&mut Locked<'_>) -> R,
{
    let mut cs = lock();
    f(&mut cs)
}

/// A cell whose contents are protected by the system lock.
pub struct LockCell<T> {
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for LockCell<T> where T: Send {}

impl<T> Default for LockCell<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for LockCell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LockCell");
        match try_lock() {
            Some(cs) => d.field("data", self.borrow(&cs)),
            None => d.field("data", &"<locked>"),
        };
        d.finish()
    }
}

impl<T> LockCell<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
        }
    }

    pub fn borrow<'a>(&'a self, _cs: &'a Locked<'_>) -> &'a T {
        unsafe { &*self.data.get() }
    }

    /// Borrows the contents mutably.
    ///
    /// The token stays borrowed for as long as the returned reference lives,
    /// so no other cell can be accessed in the meantime.
    pub fn borrow_mut<'a>(&'a self, _cs: &'a mut Locked<'_>) -> &'a mut T {
        unsafe { &mut *self.data.get() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}
