//! Seams to the surrounding platform.
//!
//! Nothing in the engine reaches for global state: the platform hands a
//! [`Platform`] bundle to [`Supervisor::attach`](crate::Supervisor::attach)
//! and every collaborator is reached through it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::liveness::{CoreId, CoreMask, LivenessMask};
use crate::panic::PanicNotifierChain;

/// Page granularity of the register-save area.
pub const PAGE_SIZE: usize = 4096;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;
}

/// Cross-core signalling used by the liveness round.
pub trait CoreMessenger: Send + Sync {
    /// Cores currently online.
    fn online_cores(&self) -> CoreMask;

    /// Run the liveness acknowledgement on `core` and wait for it.
    ///
    /// The handler on `core` calls [`LivenessMask::acknowledge`] with its
    /// own id. The call returns only after that has happened, so it blocks
    /// forever on a wedged core. Offline cores return immediately.
    fn ping(&self, core: CoreId, alive: &Arc<LivenessMask>);
}

/// A physically contiguous register-save area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegsaveRegion {
    /// Physical base address.
    pub phys: u64,
    /// Size in bytes.
    pub size: usize,
}

impl RegsaveRegion {
    /// One past the last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.phys.saturating_add(self.size as u64)
    }
}

/// Secure-world services.
///
/// Failures carry the raw status returned by the monitor.
pub trait SecureMonitor: Send + Sync {
    /// Ask the secure side to stop enforcing its own watchdog.
    ///
    /// # Errors
    ///
    /// Returns the monitor status if the secure side refuses.
    fn disable_secure_watchdog(&self) -> Result<(), i32>;

    /// Tell the secure side where to save registers before a bite.
    ///
    /// # Errors
    ///
    /// Returns the monitor status on failure.
    fn set_regsave(&self, region: RegsaveRegion) -> Result<(), i32>;

    /// Register the area in the CPU-context memory dump table.
    ///
    /// # Errors
    ///
    /// Returns the status on failure.
    fn register_dump_region(&self, region: RegsaveRegion) -> Result<(), i32>;
}

/// Backing memory for the register-save area.
pub trait RegsaveMemory: Send + Sync {
    /// Size of the memory reservation set aside for the context capture,
    /// or `None` if the platform has none.
    fn reservation_size(&self) -> Option<usize>;

    /// Allocate `size` contiguous bytes from the reservation. Contents
    /// left by the previous boot are preserved.
    fn allocate_contiguous(&self, size: usize) -> Option<u64>;

    /// Allocate a single zeroed page.
    fn allocate_page(&self) -> Option<u64>;

    /// Map `size` bytes at `phys` and run `f` over them.
    ///
    /// Returns `false` if the area could not be mapped, in which case `f`
    /// is not called.
    fn with_mapping(&self, phys: u64, size: usize, f: &mut dyn FnMut(&mut [u8])) -> bool;
}

/// Low-level system services usable with interrupts disabled.
pub trait SystemControl: Send + Sync {
    /// Busy-wait for `duration`.
    fn delay(&self, duration: Duration);

    /// Stop the kernel. Never returns.
    fn halt(&self, reason: &str) -> !;
}

/// Why the current boot happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PowerUpReason {
    /// Cold boot or reason not reported.
    #[default]
    Normal,
    /// The application-processor watchdog reset the board.
    WatchdogReset,
    /// Any other reset source.
    Other,
}

impl PowerUpReason {
    /// Decode from the raw boot-info value.
    #[must_use]
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::WatchdogReset,
            _ => Self::Other,
        }
    }

    /// Raw boot-info value.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::WatchdogReset => 1,
            Self::Other => 2,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::WatchdogReset => "watchdog reset",
            Self::Other => "other",
        }
    }

    /// Whether the previous boot ended in a watchdog reset.
    #[must_use]
    pub fn is_watchdog_reset(self) -> bool {
        self == Self::WatchdogReset
    }
}

impl fmt::Display for PowerUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine needs from the platform.
pub struct Platform<R> {
    /// Timer register block, or `None` if the window could not be mapped.
    pub registers: Option<R>,
    /// Monotonic clock.
    pub clock: Arc<dyn Clock>,
    /// Cross-core messenger.
    pub cores: Arc<dyn CoreMessenger>,
    /// Secure monitor.
    pub secure_monitor: Arc<dyn SecureMonitor>,
    /// Panic notifier chain.
    pub panic_chain: Arc<dyn PanicNotifierChain>,
    /// Register-save area memory.
    pub memory: Arc<dyn RegsaveMemory>,
    /// Delay and halt.
    pub system: Arc<dyn SystemControl>,
    /// Reason for the current boot.
    pub power_up_reason: PowerUpReason,
}

impl<R> fmt::Debug for Platform<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("registers_mapped", &self.registers.is_some())
            .field("online_cores", &self.cores.online_cores())
            .field("power_up_reason", &self.power_up_reason)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_up_reason_raw() {
        for reason in [
            PowerUpReason::Normal,
            PowerUpReason::WatchdogReset,
            PowerUpReason::Other,
        ] {
            assert_eq!(PowerUpReason::from_raw(reason.to_raw()), reason);
        }
        assert_eq!(PowerUpReason::from_raw(200), PowerUpReason::Other);
        assert!(PowerUpReason::WatchdogReset.is_watchdog_reset());
        assert!(!PowerUpReason::Normal.is_watchdog_reset());
    }

    #[test]
    fn test_region_end() {
        let region = RegsaveRegion {
            phys: 0x8000_0000,
            size: PAGE_SIZE,
        };
        assert_eq!(region.end(), 0x8000_1000);
    }
}
