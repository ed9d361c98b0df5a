//! Build-time kernel settings.

use snafu::{Location, Snafu, ensure};

use crate::{time::Interval, vt::Clock};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("tick frequency must be non-zero"))]
    ZeroTickFrequency {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("tick-less minimum delta must be at least 2 ticks, got {min_delta}"))]
    MinDeltaTooSmall {
        min_delta: Interval,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("minimum delta {min_delta} exceeds the alarm range {max_delta}"))]
    MinDeltaOutOfRange {
        min_delta: Interval,
        max_delta: Interval,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Counter frequency in Hz.
    pub tick_frequency: u32,
    /// Shortest look-ahead the tick-less alarm is ever programmed with.
    ///
    /// A deadline closer than this could already be in the past by the time
    /// the comparator is written. Ignored in periodic mode.
    pub min_delta: Interval,
    /// Bytes available to the core allocator.
    pub core_memory_size: usize,
}

impl Config {
    pub const DEFAULT: Self = Self {
        tick_frequency: 1_000,
        min_delta: Interval::from_ticks(2),
        core_memory_size: 64 * 1024,
    };

    /// Checks the settings against the clock that will drive the timers.
    pub fn validate(&self, clock: &Clock) -> Result<(), ConfigError> {
        ensure!(self.tick_frequency != 0, ZeroTickFrequencySnafu);
        if let Clock::Tickless(alarm) = clock {
            let min_delta = self.min_delta;
            ensure!(
                min_delta.ticks() >= 2,
                MinDeltaTooSmallSnafu { min_delta }
            );
            let max_delta = alarm.max_delta();
            ensure!(
                min_delta <= max_delta,
                MinDeltaOutOfRangeSnafu {
                    min_delta,
                    max_delta
                }
            );
        }
        Ok(())
    }

    /// Converts milliseconds to ticks at the configured frequency.
    #[must_use]
    pub fn millis(&self, millis: u32) -> Interval {
        Interval::from_millis(millis, self.tick_frequency)
    }

    /// Converts microseconds to ticks at the configured frequency.
    #[must_use]
    pub fn micros(&self, micros: u32) -> Interval {
        Interval::from_micros(micros, self.tick_frequency)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
