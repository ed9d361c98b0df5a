//! Time and memory core of a small real-time kernel.
//!
//! - [`vt`]: virtual timers on a single delta list, driven by a periodic
//!   tick or by a reprogrammable alarm (tick-less mode).
//! - [`memory`]: first-fit heap arenas, fixed-size pools and guarded pools
//!   whose allocations can wait for a free object.
//! - [`sync::semaphore`]: the counting semaphore guarded pools wait on.
//! - [`lock`]: the system lock every kernel structure is protected by.
//!
//! [`System`](system::System) ties them together at boot.
//!
//! ```rust
//! use kernel::{
//!     config::Config,
//!     lock,
//!     time::Interval,
//!     system::System,
//!     vt::Clock,
//! };
//!
//! let system = System::new(Config::DEFAULT, Clock::Periodic).unwrap();
//! let timers = system.timers();
//!
//! let mut cs = lock::lock();
//! let timer = timers.create(&mut cs);
//! timers.arm(&mut cs, timer, Interval::from_ticks(10), |timers, cs, _| {
//!     log::info!("fired at {}", timers.now(cs));
//! });
//! for _ in 0..10 {
//!     timers.tick(&mut cs);
//! }
//! assert!(!timers.is_armed(&cs, timer));
//! timers.delete(&mut cs, timer);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod config;
pub mod lock;
pub mod log;
pub mod memory;
pub mod sync;
pub mod system;
pub mod time;
pub mod vt;
