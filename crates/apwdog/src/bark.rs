//! Bark diagnostics.

use apwdog_timer::RegisterSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::liveness::CoreMask;

/// Message logged when the hardware ignored the forced bite.
pub const BITE_FAILED: &str = "Failed to cause a watchdog bite! - Falling back to kernel panic!";

/// Monotonic timestamp printed as `seconds.micros`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Whole seconds.
    #[must_use]
    pub fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Microseconds within the second.
    #[must_use]
    pub fn subsec_micros(self) -> u64 {
        (self.0 % 1_000_000_000) / 1_000
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs(), self.subsec_micros())
    }
}

/// What the bark handler knows before forcing the bite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarkReport {
    /// Time of the bark.
    pub now: Timestamp,
    /// Time of the last pet.
    pub last_pet: Timestamp,
    /// Cores that answered the last liveness round, when liveness pings are on.
    pub alive: Option<CoreMask>,
}

impl fmt::Display for BarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Watchdog bark! Now = {}", self.now)?;
        write!(f, "Watchdog last pet at {}", self.last_pet)?;
        if let Some(alive) = self.alive {
            write!(f, "\ncpu alive mask from last pet {alive}")?;
        }
        Ok(())
    }
}

/// State left behind when the forced bite did not reset the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarkEscalation {
    /// Diagnostics captured before the bite.
    pub report: BarkReport,
    /// Registers read back after the bite delay.
    pub registers: RegisterSnapshot,
}

impl fmt::Display for BarkEscalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.report)?;
        write!(f, "Wdog - {}", self.registers)
    }
}
