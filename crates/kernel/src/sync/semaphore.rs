//! Counting semaphore.
//!
//! The wait primitive behind guarded pools. A waiter that finds the count at
//! zero queues itself and, for a finite timeout, arms a virtual timer that
//! gives up on its behalf. Waiters are released in FIFO order.

use alloc::{collections::vec_deque::VecDeque, sync::Arc};
use core::{
    hint,
    sync::atomic::{AtomicU8, Ordering},
};

use log::trace;
use snafu::{Location, Snafu};

use crate::{
    lock::{self, LockCell, Locked},
    time::Timeout,
    vt::Timers,
};

#[derive(Debug, Snafu)]
pub enum WaitError {
    #[snafu(display("timed out waiting for the semaphore"))]
    Timeout {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("semaphore reset while waiting"))]
    Reset {
        #[snafu(implicit)]
        location: Location,
    },
}

const WAITING: u8 = 0;
const SIGNALED: u8 = 1;
const TIMED_OUT: u8 = 2;
const RESET: u8 = 3;

#[derive(Debug)]
struct Waiter {
    state: AtomicU8,
}

impl Waiter {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WAITING),
        }
    }

    /// Moves a waiting waiter to `state`. Fails if it was already woken.
    fn wake(&self, state: u8) -> bool {
        self.state
            .compare_exchange(WAITING, state, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct SemState {
    count: usize,
    waiters: VecDeque<Arc<Waiter>>,
}

#[derive(Debug)]
pub struct Semaphore {
    timers: Arc<Timers>,
    state: LockCell<SemState>,
}

impl Semaphore {
    /// Creates a semaphore with `count` units available. Timeouts are
    /// measured with `timers`.
    #[must_use]
    pub fn new(timers: Arc<Timers>, count: usize) -> Self {
        Self {
            timers,
            state: LockCell::new(SemState {
                count,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn count(&self, cs: &Locked<'_>) -> usize {
        self.state.borrow(cs).count
    }

    /// Number of queued waiters.
    pub fn waiting(&self, cs: &Locked<'_>) -> usize {
        self.state.borrow(cs).waiters.len()
    }

    /// Takes a unit without waiting.
    pub fn try_wait(&self, cs: &mut Locked<'_>) -> bool {
        let state = self.state.borrow_mut(cs);
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Takes a unit, waiting up to `timeout` for one to be signaled.
    ///
    /// Must not be called with the system lock held. [`Timeout::Immediate`]
    /// never waits.
    #[track_caller]
    pub fn wait(&self, timeout: Timeout) -> Result<(), WaitError> {
        let mut cs = lock::lock();
        if self.try_wait(&mut cs) {
            return Ok(());
        }
        let delay = match timeout {
            Timeout::Immediate => return TimeoutSnafu.fail(),
            Timeout::Ticks(delay) if delay.is_immediate() => return TimeoutSnafu.fail(),
            Timeout::Ticks(delay) => Some(delay),
            Timeout::Infinite => None,
        };

        let waiter = Arc::new(Waiter::new());
        self.state
            .borrow_mut(&mut cs)
            .waiters
            .push_back(Arc::clone(&waiter));
        let timer = delay.map(|delay| {
            let id = self.timers.create(&mut cs);
            let waiter = Arc::clone(&waiter);
            self.timers.arm(&mut cs, id, delay, move |_, _, _| {
                waiter.wake(TIMED_OUT);
            });
            id
        });
        drop(cs);

        while waiter.state() == WAITING {
            hint::spin_loop();
        }

        let mut cs = lock::lock();
        if let Some(id) = timer {
            if self.timers.is_armed(&cs, id) {
                self.timers.cancel(&mut cs, id);
            }
            self.timers.delete(&mut cs, id);
        }

        match waiter.state() {
            SIGNALED => Ok(()),
            RESET => ResetSnafu.fail(),
            _ => {
                self.state
                    .borrow_mut(&mut cs)
                    .waiters
                    .retain(|w| !Arc::ptr_eq(w, &waiter));
                trace!("semaphore wait timed out");
                TimeoutSnafu.fail()
            }
        }
    }

    /// Releases a unit, handing it to the oldest waiter if there is one.
    pub fn signal(&self, cs: &mut Locked<'_>) {
        let state = self.state.borrow_mut(cs);
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.wake(SIGNALED) {
                return;
            }
        }
        state.count += 1;
    }

    /// Sets the count to `count` and fails every pending wait with
    /// [`WaitError::Reset`].
    pub fn reset(&self, cs: &mut Locked<'_>, count: usize) {
        let state = self.state.borrow_mut(cs);
        for waiter in state.waiters.drain(..) {
            waiter.wake(RESET);
        }
        state.count = count;
    }
}
