//! The watchdog device: the single owner of the timer and its state.

use apwdog_timer::{RegisterBlock, Ticks, WatchdogTimer};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering, fence};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bark::{BITE_FAILED, BarkEscalation, BarkReport, Timestamp};
use crate::config::WatchdogConfig;
use crate::error::WatchdogError;
use crate::liveness::LivenessAggregator;
use crate::platform::{Clock, CoreMessenger, SystemControl};
use crate::scheduler::PetPhase;
use crate::stats::SlackStats;

/// Longest accepted forced-reset timeout.
pub const MAX_RESET_TIMEOUT_SECS: u32 = 60;

/// Extra seconds between bark and bite in the forced reset sequence.
const RESET_BITE_MARGIN_SECS: u32 = 2;

/// Number of retries for each fallback stage of the forced reset.
const RESET_RETRIES: u32 = 2;

/// One watchdog timer instance and everything that tracks it.
pub struct WatchdogDevice<R> {
    timer: Arc<WatchdogTimer<R>>,
    config: WatchdogConfig,
    bark_ticks: Ticks,
    bark_ns: u64,
    enabled: AtomicBool,
    // Held across a pet and across the flip of `enabled`.
    pet_lock: Mutex<()>,
    last_pet_ns: AtomicU64,
    phase: AtomicU8,
    stats: SlackStats,
    liveness: Option<LivenessAggregator>,
    clock: Arc<dyn Clock>,
    system: Arc<dyn SystemControl>,
}

impl<R: RegisterBlock> WatchdogDevice<R> {
    /// Build a device around `timer`. Nothing is written to the hardware.
    ///
    /// The liveness aggregator exists only when `ipi_ping` is set.
    pub fn new(
        timer: Arc<WatchdogTimer<R>>,
        config: WatchdogConfig,
        clock: Arc<dyn Clock>,
        cores: Arc<dyn CoreMessenger>,
        system: Arc<dyn SystemControl>,
    ) -> Self {
        let liveness = config.ipi_ping.then(|| LivenessAggregator::new(cores));
        let bark_ticks = config.bark_ticks();
        let bark_ns = u64::from(config.bark_time_ms) * 1_000_000;
        Self {
            timer,
            config,
            bark_ticks,
            bark_ns,
            enabled: AtomicBool::new(true),
            pet_lock: Mutex::new(()),
            last_pet_ns: AtomicU64::new(0),
            phase: AtomicU8::new(PetPhase::Idle.to_raw()),
            stats: SlackStats::new(),
            liveness,
            clock,
            system,
        }
    }

    /// Program the attach-time deadlines without starting the timer.
    pub fn program_deadlines(&self) {
        self.timer
            .program_deadlines(self.bark_ticks, self.config.bite_ticks());
    }

    /// Start counting, pet once and record the pet time.
    pub fn start(&self) {
        self.timer.enable();
        self.timer.pet();
        self.last_pet_ns.store(self.clock.now_ns(), Ordering::Release);
    }

    /// Pet the timer and update the slack statistics.
    ///
    /// Returns `false` without touching the hardware once the device is
    /// disabled. Pets are serialised with each other and with
    /// [`mark_disabled`](Self::mark_disabled), so no pet reaches the timer
    /// after that returns.
    pub fn pet(&self) -> bool {
        let _guard = self.pet_lock.lock();
        if !self.is_enabled() {
            return false;
        }
        let count = self.timer.read_status_counter();
        let slack_ticks = i64::from(self.bark_ticks.get()) - i64::from(count.get());

        self.timer.pet();

        let now = self.clock.now_ns();
        let last = self.last_pet_ns.load(Ordering::Acquire);
        let deadline = i128::from(last) + i128::from(self.bark_ns);
        let slack_ns = clamp_i64(deadline - i128::from(now));
        self.stats.record(slack_ticks, slack_ns);
        self.last_pet_ns.store(now, Ordering::Release);
        true
    }

    /// Whether supervision is still active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip `enabled` to false for good. Returns the previous value.
    ///
    /// Waits for a pet in flight to finish.
    pub fn mark_disabled(&self) -> bool {
        let _guard = self.pet_lock.lock();
        let previous = self.enabled.swap(false, Ordering::AcqRel);
        fence(Ordering::SeqCst);
        previous
    }

    /// Stop the timer.
    pub fn disarm(&self) {
        self.timer.disarm();
    }

    /// Quiesce the timer for system suspend. No-op once disabled.
    pub fn suspend(&self) {
        if self.is_enabled() {
            self.timer.suspend();
        }
    }

    /// Restart the timer after system resume. No-op once disabled.
    pub fn resume(&self) {
        if self.is_enabled() {
            self.timer.resume();
        }
    }

    /// Diagnostics for a bark at the current time.
    #[must_use]
    pub fn bark_report(&self) -> BarkReport {
        BarkReport {
            now: Timestamp(self.clock.now_ns()),
            last_pet: Timestamp(self.last_pet_ns.load(Ordering::Acquire)),
            alive: self.liveness.as_ref().map(LivenessAggregator::snapshot),
        }
    }

    /// Report the bark, force a bite and return what is left if the board
    /// is still running one millisecond later.
    pub fn escalate_bark(&self) -> BarkEscalation {
        let report = self.bark_report();
        info!("Watchdog bark! Now = {}", report.now);
        info!("Watchdog last pet at {}", report.last_pet);
        if let Some(alive) = report.alive {
            info!("cpu alive mask from last pet {alive}");
        }
        info!("Causing a watchdog bite!");
        self.timer.trigger_bite();
        self.system.delay(Duration::from_millis(1));
        let registers = self.timer.snapshot();
        error!("Wdog - {registers}");
        BarkEscalation { report, registers }
    }

    /// Bark interrupt entry point. Either the board resets or the kernel halts.
    pub fn on_bark_interrupt(&self) -> ! {
        let escalation = self.escalate_bark();
        error!(status = escalation.registers.status, "{BITE_FAILED}");
        self.system.halt(BITE_FAILED)
    }

    /// Force an immediate hardware reset.
    ///
    /// `timeout_secs` is clamped to [`MAX_RESET_TIMEOUT_SECS`]. The timer is
    /// armed with bark at the timeout and bite two seconds later; if the
    /// board survives, bark-only and then bite-only configurations are
    /// tried twice each. Returns only if every attempt failed.
    #[must_use]
    pub fn force_reset(&self, timeout_secs: u32) -> WatchdogError {
        let timeout = timeout_secs.min(MAX_RESET_TIMEOUT_SECS);
        let hz = self.config.clock_hz;
        let second = Duration::from_secs(1);

        self.timer.arm(
            Ticks::from_secs(timeout, hz),
            Ticks::from_secs(timeout + RESET_BITE_MARGIN_SECS, hz),
        );
        self.timer.pet();
        for _ in 0..timeout + RESET_BITE_MARGIN_SECS {
            self.system.delay(second);
        }

        for _ in 0..RESET_RETRIES {
            self.timer.program_deadlines(Ticks(0), Ticks(hz));
            self.timer.pet();
            self.system.delay(second);
        }

        for _ in 0..RESET_RETRIES {
            self.timer.program_deadlines(Ticks(hz), Ticks(0));
            self.timer.pet();
            self.system.delay(second);
        }

        error!(timeout_secs = timeout, "Watchdog reset has failed");
        WatchdogError::ResetFailed {
            timeout_secs: timeout,
        }
    }

    pub(crate) fn set_phase(&self, phase: PetPhase) {
        self.phase.store(phase.to_raw(), Ordering::Release);
    }

    /// Current pet scheduler phase.
    #[must_use]
    pub fn phase(&self) -> PetPhase {
        PetPhase::from_raw(self.phase.load(Ordering::Acquire)).unwrap_or_else(|| {
            warn!("Corrupt pet phase");
            PetPhase::Idle
        })
    }

    /// Shared timer front end.
    #[must_use]
    pub fn timer(&self) -> &Arc<WatchdogTimer<R>> {
        &self.timer
    }

    /// Device configuration.
    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Bark deadline in ticks.
    #[must_use]
    pub fn bark_ticks(&self) -> Ticks {
        self.bark_ticks
    }

    /// Monotonic time of the last pet (ns).
    #[must_use]
    pub fn last_pet_ns(&self) -> u64 {
        self.last_pet_ns.load(Ordering::Acquire)
    }

    /// Slack statistics.
    #[must_use]
    pub fn stats(&self) -> &SlackStats {
        &self.stats
    }

    /// Liveness aggregator, when per-core pings are enabled.
    #[must_use]
    pub fn liveness(&self) -> Option<&LivenessAggregator> {
        self.liveness.as_ref()
    }
}

fn clamp_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl<R> fmt::Debug for WatchdogDevice<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogDevice")
            .field("bark_ticks", &self.bark_ticks)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("last_pet_ns", &self.last_pet_ns.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
