//! Console backend for the `log` facade.
//!
//! The port registers a line writer once at boot with [`init`]. Records
//! logged before that are dropped. Each line is stamped with the system time
//! read from the source registered with [`set_time_source`], or `?` until
//! there is one.

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

use crate::time::SysTime;

/// Writes one formatted line to the console.
pub type Writer = fn(fmt::Arguments<'_>);

/// Reads the system time. Called while records are logged, possibly with the
/// system lock held, so it must read the counter without taking the lock.
pub type TimeSource = fn() -> SysTime;

static LOGGER: KernelLogger = KernelLogger::new();

/// Installs the kernel logger and sets the maximum level.
///
/// Only the first successful call has any effect.
pub fn init(writer: Writer, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.writer.call_once(|| writer);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Registers the source of line time stamps. Only the first call has any
/// effect.
pub fn set_time_source(source: TimeSource) {
    LOGGER.time.call_once(|| source);
}

#[derive(Debug)]
pub struct KernelLogger {
    writer: Once<Writer>,
    time: Once<TimeSource>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            writer: Once::new(),
            time: Once::new(),
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(writer) = self.writer.get() else {
            return;
        };
        let stamp = Stamp(self.time.get().map(|now| now()));
        writer(format_args!(
            "{stamp} {} [{}] {}",
            LevelTag(record.level()),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Time stamp column, right-aligned to the width of a 32-bit tick count.
struct Stamp(Option<SysTime>);

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(now) => write!(f, "{:>10}", now.ticks()),
            None => write!(f, "{:>10}", "?"),
        }
    }
}

/// ANSI colour code and label of a level.
const fn style(level: Level) -> (u8, &'static str) {
    match level {
        Level::Trace => (35, "TRACE"),
        Level::Debug => (34, "DEBUG"),
        Level::Info => (32, "INFO"),
        Level::Warn => (33, "WARN"),
        Level::Error => (31, "ERROR"),
    }
}

struct LevelTag(Level);

impl fmt::Display for LevelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (color, label) = style(self.0);
        write!(f, "\x1B[{color};1m{label:>5}\x1B[0m")
    }
}
