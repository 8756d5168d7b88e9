//! Pet scheduler.
//!
//! ```text
//! Idle ──tick──► Aggregating ──round done──► Petting ──pet──► Idle
//!   │                                                          │
//!   └──────────── disabled: stop rescheduling ◄────────────────┘
//! ```

use apwdog_timer::RegisterBlock;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::device::WatchdogDevice;
use crate::queue::TickOutcome;

/// Where the scheduler is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PetPhase {
    /// Waiting for the next tick.
    Idle,
    /// Running a liveness round.
    Aggregating,
    /// Reading the counter and petting.
    Petting,
}

impl PetPhase {
    /// Decode a stored phase.
    #[must_use]
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Aggregating),
            2 => Some(Self::Petting),
            _ => None,
        }
    }

    /// Encode for atomic storage.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Aggregating => 1,
            Self::Petting => 2,
        }
    }

    /// Phase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Aggregating => "aggregating",
            Self::Petting => "petting",
        }
    }
}

impl fmt::Display for PetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurring tick body: liveness round, then pet.
pub struct PetScheduler<R> {
    device: Arc<WatchdogDevice<R>>,
}

impl<R: RegisterBlock> PetScheduler<R> {
    /// Drive `device`.
    pub fn new(device: Arc<WatchdogDevice<R>>) -> Self {
        Self { device }
    }

    /// Run one tick.
    ///
    /// Blocks inside the liveness round for as long as any core stays
    /// silent. `enabled` is checked again after the pet so that a disable
    /// racing this tick leaves nothing scheduled.
    pub fn tick(&self) -> TickOutcome {
        if !self.device.is_enabled() {
            return TickOutcome::Stopped;
        }
        if let Some(liveness) = self.device.liveness() {
            self.device.set_phase(PetPhase::Aggregating);
            let alive = liveness.run_round();
            trace!(%alive, "Liveness round complete");
        }
        self.device.set_phase(PetPhase::Petting);
        self.device.pet();
        self.device.set_phase(PetPhase::Idle);

        if self.device.is_enabled() {
            TickOutcome::Rescheduled
        } else {
            TickOutcome::Stopped
        }
    }

    /// Device being driven.
    #[must_use]
    pub fn device(&self) -> &Arc<WatchdogDevice<R>> {
        &self.device
    }
}

impl<R> fmt::Debug for PetScheduler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PetScheduler")
            .field("device", &self.device)
            .finish()
    }
}
