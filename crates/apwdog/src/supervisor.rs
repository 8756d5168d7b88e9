//! Device lifecycle and control surface.
//!
//! A [`Supervisor`] is created by [`Supervisor::attach`] and lives until
//! [`Supervisor::detach`]. It owns the device, the task queue running the
//! pet scheduler and the panic hook registration.
//!
//! # Disable protocol
//!
//! Disabling is one-way for the life of the boot:
//!
//! 1. the disable lock is taken, so at most one disable runs;
//! 2. the secure side is asked to stop its own watchdog; a refusal leaves
//!    everything as it was;
//! 3. a job on the pet queue stops the timer, clears `enabled`, drops the
//!    panic hook and cancels the pending tick. Running on the queue means
//!    no tick is in flight while this happens.

use apwdog_timer::{RegisterBlock, WatchdogTimer};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bark::{BarkEscalation, BarkReport};
use crate::capture::{BarkDumpSetup, CaptureReport, configure_bark_dump};
use crate::config::WatchdogConfig;
use crate::device::WatchdogDevice;
use crate::error::{WatchdogError, WatchdogResult};
use crate::liveness::CoreId;
use crate::panic::{PanicDeadlineReprogrammer, PanicHook, PanicRegistration};
use crate::platform::{Platform, RegsaveRegion, SecureMonitor};
use crate::queue::TaskQueue;
use crate::scheduler::PetScheduler;
use crate::stats::SlackSnapshot;

/// Name of the pet task queue.
pub const QUEUE_NAME: &str = "apwdog-wq";

/// Secure call that stops the secure-side watchdog.
const SECURE_DISABLE_CALL: &str = "sec-wdog-disable";

/// State guarded by the disable lock.
#[derive(Debug, Default)]
struct ControlState {
    queue: Option<TaskQueue>,
    panic_registration: Option<PanicRegistration>,
}

/// An attached watchdog.
///
/// Dropping it detaches: the timer is stopped and the pet queue exits.
pub struct Supervisor<R: RegisterBlock + 'static> {
    device: Arc<WatchdogDevice<R>>,
    control: Mutex<ControlState>,
    secure_monitor: Arc<dyn SecureMonitor>,
    bark_dump: BarkDumpSetup,
}

impl<R: RegisterBlock + 'static> Supervisor<R> {
    /// Bring the watchdog up.
    ///
    /// Sets up the register-save area (replaying the previous capture),
    /// programs the deadlines, registers the panic hook, starts the pet
    /// queue and finally enables and pets the timer.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::DisabledByConfiguration`] when `enabled` is false
    /// - [`WatchdogError::InvalidConfiguration`] when validation fails
    /// - [`WatchdogError::RegisterMapping`] when the register window is missing
    /// - [`WatchdogError::TaskQueue`] when the pet queue cannot start
    pub fn attach(config: WatchdogConfig, platform: Platform<R>) -> WatchdogResult<Self> {
        if !config.enabled {
            info!("Watchdog disabled by configuration");
            return Err(WatchdogError::DisabledByConfiguration);
        }
        config.validate()?;

        let Platform {
            registers,
            clock,
            cores,
            secure_monitor,
            panic_chain,
            memory,
            system,
            power_up_reason,
        } = platform;
        let registers = registers
            .ok_or_else(|| WatchdogError::register_mapping("cannot map wdog register space"))?;

        let timer = Arc::new(WatchdogTimer::new(registers));
        let device = Arc::new(WatchdogDevice::new(
            Arc::clone(&timer),
            config.clone(),
            clock,
            cores,
            system,
        ));
        device.stats().reset();

        let bark_dump = configure_bark_dump(
            &config,
            memory.as_ref(),
            secure_monitor.as_ref(),
            power_up_reason,
        );
        device.program_deadlines();

        let hook: Arc<dyn PanicHook> = Arc::new(PanicDeadlineReprogrammer::new(timer, &config));
        let panic_registration = panic_chain.register(hook);

        let scheduler = PetScheduler::new(Arc::clone(&device));
        let queue = TaskQueue::start(
            QUEUE_NAME,
            CoreId(config.designated_core),
            config.pet_interval(),
            move || scheduler.tick(),
        )?;

        device.start();
        info!(
            clock_hz = config.clock_hz,
            bark_ms = config.bark_time_ms,
            pet_ms = config.pet_time_ms,
            ipi_ping = config.ipi_ping,
            "MSM Watchdog Initialized"
        );

        Ok(Self {
            device,
            control: Mutex::new(ControlState {
                queue: Some(queue),
                panic_registration: Some(panic_registration),
            }),
            secure_monitor,
            bark_dump,
        })
    }

    /// Permanently disable the watchdog.
    ///
    /// Idempotent: a second call, or a call racing the first, returns
    /// `Ok` without contacting the secure side again.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::SecureCall`] if the secure side refuses;
    /// nothing is changed and the watchdog keeps running. A dead pet queue
    /// is not an error: the timer is then stopped from the calling thread.
    pub fn disable(&self) -> WatchdogResult<()> {
        let mut control = self.control.lock();
        if !self.device.is_enabled() {
            info!("MSM Apps Watchdog already disabled");
            return Ok(());
        }
        self.secure_monitor
            .disable_secure_watchdog()
            .map_err(|status| WatchdogError::SecureCall {
                call: SECURE_DISABLE_CALL,
                status,
            })?;
        let registration = control.panic_registration.take();
        self.deactivate(&control, registration);
        Ok(())
    }

    fn deactivate(&self, control: &ControlState, registration: Option<PanicRegistration>) {
        let device = Arc::clone(&self.device);
        let queued = control.queue.as_ref().map(|queue| {
            queue.run_sync(move |ctx| {
                device.disarm();
                device.mark_disabled();
                drop(registration);
                ctx.cancel_tick();
                device.disarm();
            })
        });
        match queued {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Pet queue unavailable, deactivating inline");
                self.deactivate_inline();
            }
            None => self.deactivate_inline(),
        }
        info!("MSM Apps Watchdog deactivated");
    }

    fn deactivate_inline(&self) {
        self.device.disarm();
        self.device.mark_disabled();
        self.device.disarm();
    }

    /// Render the disabled attribute: `"1\n"` once disabled, else `"0\n"`.
    #[must_use]
    pub fn disabled_show(&self) -> String {
        let _guard = self.control.lock();
        format!("{}\n", u8::from(!self.device.is_enabled()))
    }

    /// Store into the disabled attribute. Only `1` is accepted.
    ///
    /// Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::InvalidInput`] for anything but an unsigned
    ///   decimal byte equal to 1
    /// - any error of [`Supervisor::disable`]
    pub fn disabled_store(&self, input: &str) -> WatchdogResult<usize> {
        let value = input.strip_suffix('\n').unwrap_or(input);
        let value = value.strip_prefix('+').unwrap_or(value);
        let Ok(value) = value.parse::<u8>() else {
            warn!(input, "invalid user input");
            return Err(WatchdogError::invalid_input("invalid user input"));
        };
        if value != 1 {
            warn!(value, "only disable = 1 supported");
            return Err(WatchdogError::invalid_input("only disable = 1 supported"));
        }
        self.disable()?;
        Ok(input.len())
    }

    /// Pet once outside the schedule. Returns `false` once disabled.
    pub fn pet_now(&self) -> bool {
        self.device.pet()
    }

    /// Force an immediate hardware reset; see [`WatchdogDevice::force_reset`].
    ///
    /// Returns only when the board survived every attempt.
    #[must_use]
    pub fn force_reset(&self, timeout_secs: u32) -> WatchdogError {
        self.device.force_reset(timeout_secs)
    }

    /// System suspend.
    pub fn suspend(&self) {
        self.device.suspend();
    }

    /// System resume.
    pub fn resume(&self) {
        self.device.resume();
    }

    /// Bark diagnostics without escalating.
    #[must_use]
    pub fn bark_report(&self) -> BarkReport {
        self.device.bark_report()
    }

    /// Report the bark and force a bite.
    pub fn escalate_bark(&self) -> BarkEscalation {
        self.device.escalate_bark()
    }

    /// Bark interrupt entry point.
    pub fn on_bark_interrupt(&self) -> ! {
        self.device.on_bark_interrupt()
    }

    /// Tear the watchdog down: disable it if still enabled (without the
    /// secure call) and stop the pet queue. Dropping the supervisor does
    /// the same.
    pub fn detach(self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        let mut control = self.control.lock();
        if control.queue.is_none() {
            return;
        }
        if self.device.is_enabled() {
            let registration = control.panic_registration.take();
            self.deactivate(&control, registration);
        }
        if let Some(mut queue) = control.queue.take() {
            queue.stop();
        }
        control.panic_registration = None;
        info!("MSM Watchdog Exit - Deactivated");
    }

    /// Whether supervision is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.device.is_enabled()
    }

    /// Slack statistics so far.
    #[must_use]
    pub fn stats(&self) -> SlackSnapshot {
        self.device.stats().snapshot()
    }

    /// Register-save area handed to the secure side.
    #[must_use]
    pub fn regsave_region(&self) -> Option<RegsaveRegion> {
        self.bark_dump.region
    }

    /// What the previous boot left in the capture region.
    #[must_use]
    pub fn capture_report(&self) -> Option<&CaptureReport> {
        self.bark_dump.report.as_ref()
    }

    /// Why the previous capture could not be read, if it could not.
    #[must_use]
    pub fn capture_error(&self) -> Option<&WatchdogError> {
        self.bark_dump.replay_error.as_ref()
    }

    /// Number of pet ticks run by the queue.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.control
            .lock()
            .queue
            .as_ref()
            .map_or(0, TaskQueue::tick_count)
    }

    /// Whether a pet tick is pending.
    #[must_use]
    pub fn has_pending_tick(&self) -> bool {
        self.control
            .lock()
            .queue
            .as_ref()
            .is_some_and(TaskQueue::has_pending_tick)
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &Arc<WatchdogDevice<R>> {
        &self.device
    }
}

impl<R: RegisterBlock + 'static> Drop for Supervisor<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<R: RegisterBlock + 'static> fmt::Debug for Supervisor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("device", &self.device)
            .field("regsave", &self.bark_dump.region)
            .finish_non_exhaustive()
    }
}
