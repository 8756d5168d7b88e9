//! Prelude for apwdog-timer.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use apwdog_timer::prelude::*;
//!
//! let timer = WatchdogTimer::new(SimulatedRegisters::new());
//! timer.arm(Ticks(100), Ticks(200));
//! timer.pet();
//! ```

pub use crate::error::{TimerError, TimerResult};
pub use crate::mmio::MmioRegisters;
pub use crate::registers::{Register, RegisterBlock, RegisterSnapshot, Ticks};
pub use crate::simulated::SimulatedRegisters;
pub use crate::timer::WatchdogTimer;
