//! Tick arithmetic.
//!
//! The system counter is a 32-bit tick count that wraps around. [`SysTime`]
//! is a point on that counter and [`Interval`] a span between two points. All
//! operations between them are modular, so code built on these types keeps
//! working across a counter rollover.

use core::ops::{Add, AddAssign};

const MILLIS_PER_SEC: u64 = 1_000;
const MICROS_PER_SEC: u64 = 1_000_000;

/// A value of the system tick counter.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::From,
)]
pub struct SysTime(u32);

impl SysTime {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Returns the point `interval` ticks after `self`, wrapping around the
    /// counter width.
    #[must_use]
    pub const fn wrapping_add(self, interval: Interval) -> Self {
        Self(self.0.wrapping_add(interval.0))
    }

    /// Returns the number of ticks from `self` to `later`, modulo the counter
    /// width.
    #[must_use]
    pub const fn diff(self, later: Self) -> Interval {
        Interval(later.0.wrapping_sub(self.0))
    }

    /// Returns `true` if `self` lies in the half-open window `[start, end)`.
    ///
    /// The window may wrap around the counter. An empty window (`start ==
    /// end`) contains nothing.
    #[must_use]
    pub const fn is_within(self, start: Self, end: Self) -> bool {
        start.diff(self).0 < start.diff(end).0
    }
}

impl Add<Interval> for SysTime {
    type Output = Self;

    fn add(self, rhs: Interval) -> Self::Output {
        self.wrapping_add(rhs)
    }
}

impl AddAssign<Interval> for SysTime {
    fn add_assign(&mut self, rhs: Interval) {
        *self = *self + rhs;
    }
}

/// A number of ticks.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
)]
pub struct Interval(u32);

impl Interval {
    /// The zero interval. Not a valid timer delay.
    pub const IMMEDIATE: Self = Self(0);
    /// The longest representable interval.
    pub const MAX: Self = Self(u32::MAX);

    #[must_use]
    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub const fn ticks(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_immediate(self) -> bool {
        self.0 == 0
    }

    /// Converts seconds to ticks, saturating at [`Interval::MAX`].
    #[must_use]
    pub fn from_secs(secs: u32, frequency: u32) -> Self {
        Self::saturate(u64::from(secs) * u64::from(frequency))
    }

    /// Converts milliseconds to ticks, rounding up.
    #[must_use]
    pub fn from_millis(millis: u32, frequency: u32) -> Self {
        Self::saturate((u64::from(millis) * u64::from(frequency)).div_ceil(MILLIS_PER_SEC))
    }

    /// Converts microseconds to ticks, rounding up.
    #[must_use]
    pub fn from_micros(micros: u32, frequency: u32) -> Self {
        Self::saturate((u64::from(micros) * u64::from(frequency)).div_ceil(MICROS_PER_SEC))
    }

    /// Converts ticks to milliseconds, rounding up.
    ///
    /// # Panics
    ///
    /// Panics if `frequency` is zero.
    #[must_use]
    pub fn as_millis(self, frequency: u32) -> u64 {
        (u64::from(self.0) * MILLIS_PER_SEC).div_ceil(u64::from(frequency))
    }

    /// Converts ticks to microseconds, rounding up.
    ///
    /// # Panics
    ///
    /// Panics if `frequency` is zero.
    #[must_use]
    pub fn as_micros(self, frequency: u32) -> u64 {
        (u64::from(self.0) * MICROS_PER_SEC).div_ceil(u64::from(frequency))
    }

    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(ticks) => Some(Self(ticks)),
            None => None,
        }
    }

    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Modular addition. Used by the delta list, which detects overflow by
    /// comparing the result with an operand.
    #[must_use]
    pub const fn wrapping_add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }

    /// Modular subtraction.
    #[must_use]
    pub const fn wrapping_sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }

    fn saturate(ticks: u64) -> Self {
        Self(u32::try_from(ticks).unwrap_or(u32::MAX))
    }
}

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum Timeout {
    /// Fail at once instead of waiting.
    Immediate,
    /// Wait at most this many ticks.
    Ticks(Interval),
    /// Wait until the operation succeeds.
    Infinite,
}

impl From<Interval> for Timeout {
    fn from(interval: Interval) -> Self {
        if interval.is_immediate() {
            Self::Immediate
        } else {
            Self::Ticks(interval)
        }
    }
}
