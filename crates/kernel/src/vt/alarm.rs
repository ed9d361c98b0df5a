use alloc::{boxed::Box, sync::Arc};
use core::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use spin::Mutex;

use crate::time::{Interval, SysTime};

/// A free-running counter with a one-shot compare alarm.
///
/// This is the hardware contract of tick-less mode. The port raises the alarm
/// interrupt once the counter reaches the programmed deadline and then calls
/// [`Timers::alarm`](super::Timers::alarm).
pub trait AlarmTimer: Send {
    /// Reads the counter.
    fn now(&self) -> SysTime;

    /// Enables the alarm and programs its first deadline.
    fn start_alarm(&mut self, deadline: SysTime);

    /// Reprograms the deadline of an enabled alarm.
    fn set_alarm(&mut self, deadline: SysTime);

    /// Disables the alarm.
    fn stop_alarm(&mut self);

    /// Farthest distance from now the comparator can be programmed.
    fn max_delta(&self) -> Interval {
        Interval::MAX
    }
}

/// How the virtual timers are driven. Fixed for the lifetime of the timers.
pub enum Clock {
    /// A periodic interrupt calls [`Timers::tick`](super::Timers::tick) once
    /// per tick.
    Periodic,
    /// The alarm is reprogrammed for the nearest deadline.
    Tickless(Box<dyn AlarmTimer>),
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic => f.write_str("Periodic"),
            Self::Tickless(alarm) => f
                .debug_struct("Tickless")
                .field("now", &alarm.now())
                .field("max_delta", &alarm.max_delta())
                .finish(),
        }
    }
}

/// A software [`AlarmTimer`] whose counter only moves when told to.
///
/// Used by hosted builds and by tests to drive tick-less timers
/// deterministically. Clones share the same counter and comparator.
#[derive(Debug, Clone)]
pub struct ManualAlarm {
    shared: Arc<ManualAlarmState>,
}

#[derive(Debug)]
struct ManualAlarmState {
    now: AtomicU32,
    max_delta: Interval,
    comparator: Mutex<Comparator>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Comparator {
    armed_at: SysTime,
    deadline: Option<SysTime>,
    programmed: usize,
}

impl ManualAlarm {
    #[must_use]
    pub fn new(start: SysTime) -> Self {
        Self::with_max_delta(start, Interval::MAX)
    }

    /// Creates an alarm whose comparator cannot be programmed farther than
    /// `max_delta` ticks ahead.
    #[must_use]
    pub fn with_max_delta(start: SysTime, max_delta: Interval) -> Self {
        Self {
            shared: Arc::new(ManualAlarmState {
                now: AtomicU32::new(start.ticks()),
                max_delta,
                comparator: Mutex::new(Comparator::default()),
            }),
        }
    }

    /// Reads the counter.
    #[must_use]
    pub fn now(&self) -> SysTime {
        SysTime::from_ticks(self.shared.now.load(Ordering::Acquire))
    }

    /// Moves the counter forward.
    pub fn advance(&self, ticks: Interval) {
        let now = self.now().wrapping_add(ticks);
        self.shared.now.store(now.ticks(), Ordering::Release);
    }

    /// Returns the programmed deadline, or `None` while the alarm is stopped.
    #[must_use]
    pub fn deadline(&self) -> Option<SysTime> {
        self.shared.comparator.lock().deadline
    }

    /// Returns `true` if the alarm is enabled and the counter reached it.
    #[must_use]
    pub fn is_due(&self) -> bool {
        let comparator = *self.shared.comparator.lock();
        comparator.deadline.is_some_and(|deadline| {
            comparator.armed_at.diff(self.now()) >= comparator.armed_at.diff(deadline)
        })
    }

    /// Number of times the deadline was programmed.
    #[must_use]
    pub fn programmed(&self) -> usize {
        self.shared.comparator.lock().programmed
    }

    fn program(&self, deadline: SysTime) {
        let now = self.now();
        let distance = now.diff(deadline);
        assert!(
            distance <= self.shared.max_delta,
            "alarm programmed {distance} ticks ahead, beyond the comparator range"
        );
        let mut comparator = self.shared.comparator.lock();
        comparator.armed_at = now;
        comparator.deadline = Some(deadline);
        comparator.programmed += 1;
    }
}

impl AlarmTimer for ManualAlarm {
    fn now(&self) -> SysTime {
        Self::now(self)
    }

    fn start_alarm(&mut self, deadline: SysTime) {
        self.program(deadline);
    }

    fn set_alarm(&mut self, deadline: SysTime) {
        self.program(deadline);
    }

    fn stop_alarm(&mut self) {
        self.shared.comparator.lock().deadline = None;
    }

    fn max_delta(&self) -> Interval {
        self.shared.max_delta
    }
}
