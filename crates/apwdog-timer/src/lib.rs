//! # apwdog-timer
//!
//! Register interface for the two-stage (bark/bite) application-processor
//! watchdog timer.
//!
//! This crate is `#![no_std]`-compatible and provides:
//! - [`RegisterBlock`], the seam between the driver and the physical timer
//! - [`WatchdogTimer`], the only front end the supervision engine writes through
//! - [`MmioRegisters`] for memory-mapped hardware
//! - [`SimulatedRegisters`] for host testing, with write accounting and
//!   scripted status-counter reads
//!
//! ## Register Map
//!
//! | offset | register | meaning |
//! |--------|----------|---------|
//! | `0x04` | `RST`    | write 1 to pet (restart the countdown) |
//! | `0x08` | `EN`     | 1 = counting, 0 = stopped |
//! | `0x0C` | `STS`    | bits `[20:1]` hold the current tick count |
//! | `0x10` | `BARK`   | tick count at which the bark interrupt fires |
//! | `0x14` | `BITE`   | tick count at which the board is reset |
//!
//! ## Ordering Guarantees
//!
//! Every mutating operation on [`WatchdogTimer`] ends with
//! [`RegisterBlock::barrier`], so the write is visible to the timer before
//! the caller proceeds.
//!
//! ## Example
//!
//! ```rust
//! use apwdog_timer::prelude::*;
//!
//! let timer = WatchdogTimer::new(SimulatedRegisters::new());
//! timer.arm(Ticks(32_765), Ticks(3 * 32_765));
//! timer.pet();
//!
//! assert!(timer.is_enabled());
//! assert_eq!(timer.registers().pet_count(), 1);
//! ```

#![no_std]
#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod mmio;
pub mod prelude;
pub mod registers;
pub mod simulated;
pub mod timer;

pub use error::{TimerError, TimerResult};
pub use mmio::MmioRegisters;
pub use registers::{Register, RegisterBlock, RegisterSnapshot, Ticks};
pub use simulated::SimulatedRegisters;
pub use timer::WatchdogTimer;
