//! Virtual timers.
//!
//! All time-based wakeups in the kernel are virtual timers: one-shot or
//! continuous callbacks kept on a single delta list and driven by either a
//! periodic tick interrupt or a reprogrammable alarm. The list itself is
//! [`VirtualTimers`]; [`Timers`] puts it behind the system lock and runs the
//! expiry handlers.
//!
//! Callbacks run with the system lock held and receive the lock token, so
//! they can arm or cancel timers and signal semaphores directly.

use alloc::sync::Arc;

use log::trace;

pub use self::{
    alarm::{AlarmTimer, Clock, ManualAlarm},
    list::{Expired, TimerId, VirtualTimers},
};
use crate::{
    lock::{LockCell, Locked},
    time::{Interval, SysTime},
};

mod alarm;
mod list;

/// Function called when a timer expires.
pub type Callback = Arc<dyn Fn(&Timers, &mut Locked<'_>, TimerId) + Send + Sync>;

/// The system's virtual timers.
#[derive(Debug)]
pub struct Timers {
    list: LockCell<VirtualTimers<Callback>>,
}

impl Timers {
    #[must_use]
    pub fn new(clock: Clock, min_delta: Interval) -> Self {
        Self {
            list: LockCell::new(VirtualTimers::new(clock, min_delta)),
        }
    }

    pub fn is_tickless(&self, cs: &Locked<'_>) -> bool {
        self.list.borrow(cs).is_tickless()
    }

    pub fn now(&self, cs: &Locked<'_>) -> SysTime {
        self.list.borrow(cs).now()
    }

    pub fn elapsed_since(&self, cs: &Locked<'_>, start: SysTime) -> Interval {
        self.list.borrow(cs).elapsed_since(start)
    }

    pub fn is_within(&self, cs: &Locked<'_>, start: SysTime, end: SysTime) -> bool {
        self.list.borrow(cs).is_within(start, end)
    }

    pub fn create(&self, cs: &mut Locked<'_>) -> TimerId {
        self.list.borrow_mut(cs).create()
    }

    pub fn delete(&self, cs: &mut Locked<'_>, id: TimerId) {
        self.list.borrow_mut(cs).delete(id);
    }

    pub fn is_armed(&self, cs: &Locked<'_>, id: TimerId) -> bool {
        self.list.borrow(cs).is_armed(id)
    }

    pub fn remaining(&self, cs: &Locked<'_>, id: TimerId) -> Interval {
        self.list.borrow(cs).remaining(id)
    }

    /// Arms a one-shot timer.
    ///
    /// See [`VirtualTimers::arm`].
    pub fn arm<C>(&self, cs: &mut Locked<'_>, id: TimerId, delay: Interval, callback: C)
    where
        C: Fn(&Self, &mut Locked<'_>, TimerId) + Send + Sync + 'static,
    {
        self.list.borrow_mut(cs).arm(id, delay, Arc::new(callback));
    }

    /// Arms a continuous timer.
    ///
    /// After each expiry the timer is armed again for the next period, unless
    /// the callback armed, cancelled-and-rearmed or deleted it. The next delay
    /// is shortened by however late the expiry was handled, so the firing
    /// times do not drift.
    pub fn arm_periodic<C>(
        &self,
        cs: &mut Locked<'_>,
        id: TimerId,
        delay: Interval,
        period: Interval,
        callback: C,
    ) where
        C: Fn(&Self, &mut Locked<'_>, TimerId) + Send + Sync + 'static,
    {
        self.list
            .borrow_mut(cs)
            .arm_periodic(id, delay, period, Arc::new(callback));
    }

    pub fn cancel(&self, cs: &mut Locked<'_>, id: TimerId) {
        self.list.borrow_mut(cs).cancel(id);
    }

    /// Periodic tick handler.
    ///
    /// Called from the tick interrupt once per tick.
    pub fn tick(&self, cs: &mut Locked<'_>) {
        self.list.borrow_mut(cs).advance();
        self.dispatch(cs);
    }

    /// Tick-less alarm handler.
    ///
    /// Called from the alarm interrupt. Spurious calls are harmless.
    pub fn alarm(&self, cs: &mut Locked<'_>) {
        self.dispatch(cs);
    }

    fn dispatch(&self, cs: &mut Locked<'_>) {
        loop {
            let Some(expired) = self.list.borrow_mut(cs).expire_next() else {
                break;
            };
            (expired.callback)(self, cs, expired.id);

            let Some(period) = expired.reload else {
                continue;
            };
            let list = self.list.borrow_mut(cs);
            if list.contains(expired.id) && !list.is_armed(expired.id) {
                let delay = period
                    .saturating_sub(expired.lateness)
                    .max(Interval::from_ticks(1));
                trace!("timer {} reloaded for {delay} ticks", expired.id);
                list.arm_periodic(expired.id, delay, period, expired.callback);
            }
        }
    }
}
