//! The virtual timer delta list.
//!
//! Pending timers are kept in a circular doubly-linked list ordered by
//! deadline. Each entry stores only the number of ticks between its
//! predecessor's deadline and its own, so advancing time touches the first
//! entry only. Entries live in a slab and link to each other by index; slot 0
//! is the list head, whose delta is [`Interval::MAX`] so that a scan always
//! stops there.
//!
//! In periodic mode the first delta is counted from the current tick. In
//! tick-less mode it is counted from `lasttime`, the counter value at which
//! the list was last brought up to date, and the hardware alarm is kept
//! programmed for the first deadline.
//!
//! The deltas up to any entry never add up to more than [`Interval::MAX`],
//! so every deadline lies within one counter period of the list's time base.

use alloc::{vec, vec::Vec};
use core::{fmt, iter};

use log::trace;

use super::{AlarmTimer, Clock};
use crate::time::{Interval, SysTime};

const HEAD: usize = 0;

/// Handle of a virtual timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u32,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

enum Slot<F> {
    Vacant,
    Idle,
    Armed {
        callback: F,
        reload: Option<Interval>,
    },
}

struct Entry<F> {
    prev: usize,
    next: usize,
    delta: Interval,
    generation: u32,
    slot: Slot<F>,
}

/// A timer taken off the list because its deadline passed.
#[derive(Debug)]
pub struct Expired<F> {
    pub id: TimerId,
    pub callback: F,
    /// Period of a continuous timer.
    pub reload: Option<Interval>,
    /// Ticks between the deadline and the moment the timer was taken off.
    pub lateness: Interval,
}

pub struct VirtualTimers<F> {
    entries: Vec<Entry<F>>,
    vacant: Vec<usize>,
    clock: Clock,
    min_delta: Interval,
    systime: SysTime,
    lasttime: SysTime,
}

impl<F> fmt::Debug for VirtualTimers<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTimers")
            .field("clock", &self.clock)
            .field("min_delta", &self.min_delta)
            .field("systime", &self.systime)
            .field("lasttime", &self.lasttime)
            .field("pending", &DebugPending(self))
            .finish_non_exhaustive()
    }
}

struct DebugPending<'a, F>(&'a VirtualTimers<F>);

impl<F> fmt::Debug for DebugPending<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.pending()).finish()
    }
}

impl<F> VirtualTimers<F> {
    /// Creates an empty list.
    ///
    /// `min_delta` is the shortest distance from now the alarm is ever
    /// programmed for in tick-less mode.
    ///
    /// # Panics
    ///
    /// Panics if `min_delta` exceeds the alarm's range.
    #[must_use]
    pub fn new(clock: Clock, min_delta: Interval) -> Self {
        let head = Entry {
            prev: HEAD,
            next: HEAD,
            delta: Interval::MAX,
            generation: 0,
            slot: Slot::Vacant,
        };
        let timers = Self {
            entries: vec![head],
            vacant: Vec::new(),
            clock,
            min_delta,
            systime: SysTime::ZERO,
            lasttime: SysTime::ZERO,
        };
        assert!(
            min_delta <= timers.max_delta(),
            "minimum delta {min_delta} exceeds the alarm range"
        );
        timers
    }

    #[must_use]
    pub fn is_tickless(&self) -> bool {
        matches!(self.clock, Clock::Tickless(_))
    }

    #[must_use]
    pub fn min_delta(&self) -> Interval {
        self.min_delta
    }

    /// Farthest distance the alarm can be programmed ahead.
    #[must_use]
    pub fn max_delta(&self) -> Interval {
        match &self.clock {
            Clock::Periodic => Interval::MAX,
            Clock::Tickless(alarm) => alarm.max_delta(),
        }
    }

    /// Returns the current system time.
    #[must_use]
    pub fn now(&self) -> SysTime {
        match &self.clock {
            Clock::Periodic => self.systime,
            Clock::Tickless(alarm) => alarm.now(),
        }
    }

    /// Ticks elapsed since `start`.
    #[must_use]
    pub fn elapsed_since(&self, start: SysTime) -> Interval {
        start.diff(self.now())
    }

    /// Returns `true` if the current time lies in `[start, end)`.
    #[must_use]
    pub fn is_within(&self, start: SysTime, end: SysTime) -> bool {
        self.now().is_within(start, end)
    }

    /// Allocates an idle timer.
    pub fn create(&mut self) -> TimerId {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index];
            entry.slot = Slot::Idle;
            return TimerId {
                index,
                generation: entry.generation,
            };
        }

        let index = self.entries.len();
        self.entries.push(Entry {
            prev: index,
            next: index,
            delta: Interval::IMMEDIATE,
            generation: 0,
            slot: Slot::Idle,
        });
        TimerId {
            index,
            generation: 0,
        }
    }

    /// Releases an idle timer. The id becomes invalid.
    ///
    /// # Panics
    ///
    /// Panics if the timer is armed.
    pub fn delete(&mut self, id: TimerId) {
        let entry = self.entry_mut(id);
        assert!(
            matches!(entry.slot, Slot::Idle),
            "timer {id} deleted while armed"
        );
        entry.slot = Slot::Vacant;
        entry.generation = entry.generation.wrapping_add(1);
        self.vacant.push(id.index);
    }

    /// Returns `true` if `id` refers to a timer that was not deleted.
    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        id.index != HEAD
            && self.entries.get(id.index).is_some_and(|entry| {
                entry.generation == id.generation && !matches!(entry.slot, Slot::Vacant)
            })
    }

    #[must_use]
    pub fn is_armed(&self, id: TimerId) -> bool {
        matches!(self.entry(id).slot, Slot::Armed { .. })
    }

    /// Arms a one-shot timer to fire `delay` ticks from now.
    ///
    /// In tick-less mode delays shorter than the minimum delta are extended.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already armed or `delay` is zero.
    pub fn arm(&mut self, id: TimerId, delay: Interval, callback: F) {
        self.arm_with_reload(id, delay, None, callback);
    }

    /// Arms a continuous timer that fires after `delay` ticks and then every
    /// `period` ticks until cancelled.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already armed, or `delay` or `period` is zero.
    pub fn arm_periodic(&mut self, id: TimerId, delay: Interval, period: Interval, callback: F) {
        assert!(!period.is_immediate(), "timer {id} armed with a zero period");
        self.arm_with_reload(id, delay, Some(period), callback);
    }

    fn arm_with_reload(
        &mut self,
        id: TimerId,
        delay: Interval,
        reload: Option<Interval>,
        callback: F,
    ) {
        assert!(!delay.is_immediate(), "timer {id} armed with a zero delay");
        let entry = self.entry_mut(id);
        assert!(matches!(entry.slot, Slot::Idle), "timer {id} already armed");
        entry.slot = Slot::Armed { callback, reload };

        if self.is_tickless() {
            self.insert_tickless(id.index, delay);
        } else {
            self.insert_from(self.first(), id.index, delay);
        }
        trace!("timer {id} armed for {delay} ticks");
    }

    fn insert_tickless(&mut self, index: usize, delay: Interval) {
        let delay = delay.max(self.min_delta);
        let now = self.now();
        let first = self.first();

        if first == HEAD {
            // The list becomes time-referenced from now.
            self.lasttime = now;
            self.link_before(HEAD, index, delay);
            let deadline = self.lasttime + delay.min(self.max_delta());
            self.alarm().start_alarm(deadline);
            return;
        }

        let nowdelta = self.lasttime.diff(now);
        let delta = match nowdelta.checked_add(delay) {
            Some(delta) => delta,
            None => {
                // The deadline is more than a counter period past `lasttime`.
                self.rebase(now);
                delay
            }
        };
        if delta < self.entries[first].delta {
            let deadline = self.lasttime + delta.min(self.max_delta());
            self.alarm().set_alarm(deadline);
        }
        self.insert_from(first, index, delta);
    }

    /// Moves `lasttime` forward to `now`.
    ///
    /// Timers whose deadline already passed are left at a zero delta, to be
    /// taken off by the pending alarm.
    fn rebase(&mut self, now: SysTime) {
        let mut elapsed = self.lasttime.diff(now);
        self.lasttime = now;
        let mut p = self.first();
        while p != HEAD && !elapsed.is_immediate() {
            let entry = &mut self.entries[p];
            let step = entry.delta.min(elapsed);
            entry.delta = entry.delta.wrapping_sub(step);
            elapsed = elapsed.wrapping_sub(step);
            p = entry.next;
        }
        trace!("timer list rebased to {now}");
    }

    /// Links `index` at its position at or after `start`, `delta` ticks past
    /// the deadline of `start`'s predecessor.
    fn insert_from(&mut self, start: usize, index: usize, delta: Interval) {
        let mut p = start;
        let mut delta = delta;
        // `<=` keeps equal deadlines in insertion order.
        while p != HEAD && self.entries[p].delta <= delta {
            delta = delta.wrapping_sub(self.entries[p].delta);
            p = self.entries[p].next;
        }
        self.link_before(p, index, delta);
        if p != HEAD {
            self.entries[p].delta = self.entries[p].delta.wrapping_sub(delta);
        }
    }

    /// Disarms a timer.
    ///
    /// In tick-less mode, cancelling the first timer does not pull the alarm
    /// back if the new first deadline has already passed: the pending alarm
    /// interrupt serves it.
    ///
    /// # Panics
    ///
    /// Panics if the timer is not armed.
    pub fn cancel(&mut self, id: TimerId) {
        assert!(self.is_armed(id), "timer {id} cancelled while idle");
        let index = id.index;
        let was_first = self.first() == index;
        let delta = self.entries[index].delta;
        let next = self.unlink(index);
        self.entries[index].slot = Slot::Idle;
        trace!("timer {id} cancelled");

        if next == HEAD {
            if was_first && self.is_tickless() {
                self.alarm().stop_alarm();
            }
            return;
        }
        let Some(merged) = self.entries[next].delta.checked_add(delta) else {
            unreachable!("timers beyond {id} span more than a counter period");
        };
        self.entries[next].delta = merged;

        if !was_first || !self.is_tickless() {
            return;
        }

        let now = self.now();
        let nowdelta = self.lasttime.diff(now);
        let next_delta = self.entries[next].delta;
        if nowdelta >= next_delta {
            return;
        }
        let ahead = (next_delta.wrapping_sub(nowdelta))
            .max(self.min_delta)
            .min(self.max_delta());
        self.alarm().set_alarm(now + ahead);
    }

    /// Ticks left before the timer fires.
    ///
    /// # Panics
    ///
    /// Panics if the timer is not armed.
    #[must_use]
    pub fn remaining(&self, id: TimerId) -> Interval {
        assert!(self.is_armed(id), "timer {id} is not armed");
        let mut total = 0_u64;
        let mut p = self.first();
        loop {
            total += u64::from(self.entries[p].delta.ticks());
            if p == id.index {
                break;
            }
            p = self.entries[p].next;
        }

        let elapsed = if self.is_tickless() {
            self.lasttime.diff(self.now())
        } else {
            Interval::IMMEDIATE
        };
        let remaining = total.saturating_sub(u64::from(elapsed.ticks()));
        Interval::from_ticks(u32::try_from(remaining).unwrap_or(u32::MAX))
    }

    /// Armed timers in firing order with their deltas.
    pub fn pending(&self) -> impl Iterator<Item = (TimerId, Interval)> + '_ {
        let mut p = self.first();
        iter::from_fn(move || {
            if p == HEAD {
                return None;
            }
            let entry = &self.entries[p];
            let item = (
                TimerId {
                    index: p,
                    generation: entry.generation,
                },
                entry.delta,
            );
            p = entry.next;
            Some(item)
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first() == HEAD
    }

    /// Counter value the first delta is measured from in tick-less mode.
    #[must_use]
    pub fn lasttime(&self) -> SysTime {
        self.lasttime
    }

    /// Advances the system time by one tick.
    ///
    /// Periodic mode only. Follow with [`expire_next`](Self::expire_next)
    /// until it returns `None`.
    ///
    /// # Panics
    ///
    /// Panics in tick-less mode.
    pub fn advance(&mut self) {
        assert!(!self.is_tickless(), "periodic tick in tick-less mode");
        self.systime += Interval::from_ticks(1);
        let first = self.first();
        if first != HEAD {
            let entry = &mut self.entries[first];
            entry.delta = entry.delta.saturating_sub(Interval::from_ticks(1));
        }
    }

    /// Takes the first timer off the list if its deadline has passed.
    ///
    /// In tick-less mode, when nothing is due the list is rebased to the
    /// current counter value and the alarm is reprogrammed for the first
    /// deadline, no closer than the minimum delta and no farther than the
    /// alarm's range. A deadline beyond that range thus takes several alarms
    /// to reach, none of which fires the timer early.
    pub fn expire_next(&mut self) -> Option<Expired<F>> {
        let first = self.first();
        if first == HEAD {
            return None;
        }
        let delta = self.entries[first].delta;

        if !self.is_tickless() {
            return delta
                .is_immediate()
                .then(|| self.pop_first(Interval::IMMEDIATE));
        }

        let now = self.now();
        let nowdelta = self.lasttime.diff(now);
        if delta <= nowdelta {
            self.lasttime += delta;
            let expired = self.pop_first(nowdelta.wrapping_sub(delta));
            if self.is_empty() {
                self.alarm().stop_alarm();
            }
            return Some(expired);
        }

        self.lasttime += nowdelta;
        let delta = delta.wrapping_sub(nowdelta);
        self.entries[first].delta = delta;
        let max_delta = self.max_delta();
        if delta > max_delta {
            trace!("first timer {delta} ticks away, alarm set {max_delta} ahead");
        }
        let ahead = delta.max(self.min_delta).min(max_delta);
        self.alarm().set_alarm(now + ahead);
        None
    }

    fn pop_first(&mut self, lateness: Interval) -> Expired<F> {
        let index = self.first();
        self.unlink(index);
        let entry = &mut self.entries[index];
        let Slot::Armed { callback, reload } = core::mem::replace(&mut entry.slot, Slot::Idle)
        else {
            unreachable!("idle timer #{index} in the pending list");
        };
        let id = TimerId {
            index,
            generation: entry.generation,
        };
        trace!("timer {id} expired, {lateness} ticks late");
        Expired {
            id,
            callback,
            reload,
            lateness,
        }
    }

    fn first(&self) -> usize {
        self.entries[HEAD].next
    }

    fn alarm(&mut self) -> &mut dyn AlarmTimer {
        match &mut self.clock {
            Clock::Tickless(alarm) => alarm.as_mut(),
            Clock::Periodic => unreachable!("no alarm in periodic mode"),
        }
    }

    fn link_before(&mut self, p: usize, index: usize, delta: Interval) {
        let prev = self.entries[p].prev;
        let entry = &mut self.entries[index];
        entry.prev = prev;
        entry.next = p;
        entry.delta = delta;
        self.entries[prev].next = index;
        self.entries[p].prev = index;
    }

    /// Removes `index` from the list and returns its former successor.
    fn unlink(&mut self, index: usize) -> usize {
        let (prev, next) = (self.entries[index].prev, self.entries[index].next);
        self.entries[prev].next = next;
        self.entries[next].prev = prev;
        let entry = &mut self.entries[index];
        entry.prev = index;
        entry.next = index;
        next
    }

    fn entry(&self, id: TimerId) -> &Entry<F> {
        assert!(self.contains(id), "invalid timer {id}");
        &self.entries[id.index]
    }

    fn entry_mut(&mut self, id: TimerId) -> &mut Entry<F> {
        assert!(self.contains(id), "invalid timer {id}");
        &mut self.entries[id.index]
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;
    use crate::vt::ManualAlarm;

    fn ticks(n: u32) -> Interval {
        Interval::from_ticks(n)
    }

    fn periodic() -> VirtualTimers<&'static str> {
        VirtualTimers::new(Clock::Periodic, ticks(2))
    }

    fn tickless(alarm: &ManualAlarm) -> VirtualTimers<&'static str> {
        VirtualTimers::new(Clock::Tickless(Box::new(alarm.clone())), ticks(2))
    }

    fn deltas<F>(timers: &VirtualTimers<F>) -> Vec<u32> {
        timers.pending().map(|(_, delta)| delta.ticks()).collect()
    }

    /// Runs the periodic tick handler `n` times and collects what fired.
    fn run_ticks(timers: &mut VirtualTimers<&'static str>, n: u32) -> Vec<(u32, &'static str)> {
        let mut fired = Vec::new();
        for _ in 0..n {
            timers.advance();
            while let Some(expired) = timers.expire_next() {
                fired.push((timers.now().ticks(), expired.callback));
            }
        }
        fired
    }

    /// Moves the manual counter one tick at a time, running the alarm handler
    /// whenever the alarm is due.
    fn run_alarm(
        timers: &mut VirtualTimers<&'static str>,
        alarm: &ManualAlarm,
        n: u32,
    ) -> Vec<(u32, &'static str)> {
        let mut fired = Vec::new();
        for _ in 0..n {
            alarm.advance(ticks(1));
            if alarm.is_due() {
                while let Some(expired) = timers.expire_next() {
                    fired.push((alarm.now().ticks(), expired.callback));
                }
            }
        }
        fired
    }

    #[test]
    fn test_delta_encoding() {
        let mut timers = periodic();
        let a = timers.create();
        let b = timers.create();
        let c = timers.create();
        timers.arm(a, ticks(50), "a");
        timers.arm(b, ticks(10), "b");
        timers.arm(c, ticks(30), "c");
        assert_eq!(deltas(&timers), [10, 20, 20]);
        assert_eq!(timers.remaining(a), ticks(50));
        assert_eq!(timers.remaining(c), ticks(30));
    }

    #[test]
    fn test_periodic_fire_order() {
        let mut timers = periodic();
        for (delay, name) in [(50, "fifty"), (10, "ten"), (30, "thirty")] {
            let id = timers.create();
            timers.arm(id, ticks(delay), name);
        }
        let fired = run_ticks(&mut timers, 60);
        assert_eq!(fired, [(10, "ten"), (30, "thirty"), (50, "fifty")]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let mut timers = periodic();
        for name in ["first", "second", "third"] {
            let id = timers.create();
            timers.arm(id, ticks(5), name);
        }
        assert_eq!(deltas(&timers), [5, 0, 0]);
        let fired = run_ticks(&mut timers, 5);
        assert_eq!(fired, [(5, "first"), (5, "second"), (5, "third")]);
    }

    #[test]
    fn test_cancel_merges_delta() {
        let mut timers = periodic();
        let a = timers.create();
        let b = timers.create();
        let c = timers.create();
        timers.arm(a, ticks(10), "a");
        timers.arm(b, ticks(30), "b");
        timers.arm(c, ticks(50), "c");

        timers.cancel(b);
        assert_eq!(deltas(&timers), [10, 40]);
        assert!(!timers.is_armed(b));
        timers.cancel(a);
        assert_eq!(deltas(&timers), [50]);
        timers.cancel(c);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_arm_then_cancel_restores_list() {
        let mut timers = periodic();
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(10), "a");
        timers.arm(b, ticks(30), "b");
        let before = deltas(&timers);

        let c = timers.create();
        timers.arm(c, ticks(20), "c");
        timers.cancel(c);
        assert_eq!(deltas(&timers), before);
    }

    #[test]
    fn test_max_delay_is_a_normal_timeout() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm(id, Interval::MAX, "max");
        assert_eq!(timers.remaining(id), Interval::MAX);
        let other = timers.create();
        timers.arm(other, ticks(1), "one");
        assert_eq!(deltas(&timers), [1, u32::MAX - 1]);
    }

    #[test]
    fn test_rearm_from_expired() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm(id, ticks(3), "once");
        timers.advance();
        timers.advance();
        timers.advance();
        let expired = timers.expire_next().unwrap();
        assert_eq!(expired.id, id);
        assert_eq!(expired.reload, None);
        assert!(!timers.is_armed(id));
        timers.arm(id, ticks(2), "twice");
        assert!(timers.is_armed(id));
    }

    #[test]
    fn test_delete_recycles_slot() {
        let mut timers = periodic();
        let a = timers.create();
        timers.delete(a);
        assert!(!timers.contains(a));
        let b = timers.create();
        assert!(timers.contains(b));
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "already armed")]
    fn test_double_arm() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm(id, ticks(1), "a");
        timers.arm(id, ticks(1), "a");
    }

    #[test]
    #[should_panic(expected = "cancelled while idle")]
    fn test_cancel_idle() {
        let mut timers = periodic();
        let id = timers.create();
        timers.cancel(id);
    }

    #[test]
    #[should_panic(expected = "zero delay")]
    fn test_zero_delay() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm(id, Interval::IMMEDIATE, "a");
    }

    #[test]
    #[should_panic(expected = "invalid timer")]
    fn test_stale_id() {
        let mut timers = periodic();
        let id = timers.create();
        timers.delete(id);
        let _ = timers.create();
        timers.arm(id, ticks(1), "a");
    }

    #[test]
    #[should_panic(expected = "deleted while armed")]
    fn test_delete_armed() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm(id, ticks(1), "a");
        timers.delete(id);
    }

    #[test]
    fn test_tickless_first_arm_starts_alarm() {
        let alarm = ManualAlarm::new(SysTime::from_ticks(100));
        let mut timers = tickless(&alarm);
        let id = timers.create();
        timers.arm(id, ticks(10), "a");
        assert_eq!(timers.lasttime(), SysTime::from_ticks(100));
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(110)));
    }

    #[test]
    fn test_tickless_earlier_timer_reprograms_alarm() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(50), "a");
        alarm.advance(ticks(5));
        timers.arm(b, ticks(10), "b");
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(15)));
        assert_eq!(deltas(&timers), [15, 35]);

        // A later timer leaves the alarm alone.
        let c = timers.create();
        let programmed = alarm.programmed();
        timers.arm(c, ticks(20), "c");
        assert_eq!(alarm.programmed(), programmed);
    }

    #[test]
    fn test_tickless_fire_order() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        for (delay, name) in [(50, "fifty"), (10, "ten"), (30, "thirty")] {
            let id = timers.create();
            timers.arm(id, ticks(delay), name);
        }
        let fired = run_alarm(&mut timers, &alarm, 60);
        assert_eq!(fired, [(10, "ten"), (30, "thirty"), (50, "fifty")]);
        assert_eq!(alarm.deadline(), None);
    }

    #[test]
    fn test_tickless_short_delay_extended_to_min_delta() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let id = timers.create();
        timers.arm(id, ticks(1), "short");
        assert_eq!(timers.remaining(id), ticks(2));
        let fired = run_alarm(&mut timers, &alarm, 3);
        assert_eq!(fired, [(2, "short")]);
    }

    #[test]
    fn test_tickless_narrow_alarm_rearms_without_firing() {
        let alarm = ManualAlarm::with_max_delta(SysTime::ZERO, ticks(100));
        let mut timers = tickless(&alarm);
        let id = timers.create();
        timers.arm(id, ticks(250), "far");
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(100)));

        let fired = run_alarm(&mut timers, &alarm, 100);
        assert!(fired.is_empty());
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(200)));
        assert_eq!(timers.remaining(id), ticks(150));

        let fired = run_alarm(&mut timers, &alarm, 150);
        assert_eq!(fired, [(250, "far")]);
    }

    #[test]
    fn test_tickless_cancel_first_reprograms_alarm() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(10), "a");
        timers.arm(b, ticks(40), "b");
        alarm.advance(ticks(3));

        timers.cancel(a);
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(40)));
        assert_eq!(timers.remaining(b), ticks(37));

        timers.cancel(b);
        assert_eq!(alarm.deadline(), None);
    }

    #[test]
    fn test_tickless_cancel_first_skips_reprogram_when_alarm_pending() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(10), "a");
        timers.arm(b, ticks(12), "b");

        // The alarm for `a` is overdue but its handler has not run yet.
        alarm.advance(ticks(15));
        let programmed = alarm.programmed();
        timers.cancel(a);
        assert_eq!(alarm.programmed(), programmed);
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(10)));

        // The pending alarm now serves `b`.
        assert!(alarm.is_due());
        let expired = timers.expire_next().unwrap();
        assert_eq!(expired.callback, "b");
        assert_eq!(expired.lateness, ticks(3));
    }

    #[test]
    fn test_tickless_spurious_alarm_is_harmless() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let id = timers.create();
        timers.arm(id, ticks(20), "a");
        alarm.advance(ticks(5));
        assert!(timers.expire_next().is_none());
        assert_eq!(timers.lasttime(), SysTime::from_ticks(5));
        assert_eq!(timers.remaining(id), ticks(15));
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(20)));
    }

    #[test]
    fn test_tickless_rollover() {
        let start = SysTime::from_ticks(u32::MAX - 5);
        let alarm = ManualAlarm::new(start);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(10), "a");
        timers.arm(b, ticks(20), "b");
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(4)));

        let fired = run_alarm(&mut timers, &alarm, 20);
        assert_eq!(fired, [(4, "a"), (14, "b")]);
    }

    #[test]
    fn test_tickless_delay_overflowing_counter() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        timers.arm(a, ticks(1000), "a");
        alarm.advance(ticks(100));

        // 100 elapsed ticks plus the maximum delay overflow the counter.
        let b = timers.create();
        timers.arm(b, Interval::MAX, "b");
        assert_eq!(
            timers.pending().map(|(id, _)| id).collect::<Vec<_>>(),
            [a, b]
        );
        assert_eq!(timers.remaining(a), ticks(900));
        assert_eq!(timers.remaining(b), Interval::MAX);
        assert_eq!(alarm.deadline(), Some(SysTime::from_ticks(1000)));
    }

    #[test]
    fn test_tickless_max_delay_behind_overdue_timer() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        timers.arm(a, ticks(10), "a");

        // The alarm for `a` is overdue and has not been served.
        alarm.advance(ticks(100));
        let b = timers.create();
        timers.arm(b, Interval::MAX, "b");
        assert_eq!(timers.lasttime(), SysTime::from_ticks(100));
        assert_eq!(timers.remaining(a), Interval::IMMEDIATE);
        assert_eq!(timers.remaining(b), Interval::MAX);

        let expired = timers.expire_next().unwrap();
        assert_eq!(expired.callback, "a");
        assert!(timers.expire_next().is_none());
        assert!(timers.is_armed(b));
        assert_eq!(timers.remaining(b), Interval::MAX);
    }

    #[test]
    fn test_tickless_cancel_keeps_far_deadline() {
        let alarm = ManualAlarm::new(SysTime::ZERO);
        let mut timers = tickless(&alarm);
        let a = timers.create();
        let b = timers.create();
        timers.arm(a, ticks(1000), "a");
        alarm.advance(ticks(100));
        timers.arm(b, Interval::MAX, "b");
        assert_eq!(timers.remaining(b), Interval::MAX);

        timers.cancel(a);
        assert_eq!(timers.remaining(b), Interval::MAX);
        assert_eq!(deltas(&timers), [u32::MAX]);

        alarm.advance(ticks(1));
        assert_eq!(timers.remaining(b), ticks(u32::MAX - 1));
    }

    #[test]
    fn test_periodic_mode_has_no_lateness() {
        let mut timers = periodic();
        let id = timers.create();
        timers.arm_periodic(id, ticks(2), ticks(4), "p");
        timers.advance();
        assert!(timers.expire_next().is_none());
        timers.advance();
        let expired = timers.expire_next().unwrap();
        assert_eq!(expired.reload, Some(ticks(4)));
        assert_eq!(expired.lateness, Interval::IMMEDIATE);
    }
}
