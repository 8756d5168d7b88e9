//! Panic-time deadline reprogramming.
//!
//! The hook runs in panic context. It only writes timer registers and
//! issues barriers: no locks, no allocation, no queue operations.

use apwdog_timer::{RegisterBlock, Ticks, WatchdogTimer};
use std::fmt;
use std::sync::Arc;

use crate::config::WatchdogConfig;

/// Callback invoked once per kernel panic.
pub trait PanicHook: Send + Sync {
    /// React to the panic.
    fn on_panic(&self);
}

/// Registration capability for panic hooks.
pub trait PanicNotifierChain: Send + Sync {
    /// Add `hook` to the chain. The hook stays registered until the
    /// returned guard is dropped or [`PanicRegistration::unregister`] is called.
    fn register(&self, hook: Arc<dyn PanicHook>) -> PanicRegistration;
}

/// Scoped panic-hook registration.
#[must_use = "dropping the registration unregisters the hook"]
pub struct PanicRegistration {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl PanicRegistration {
    /// Wrap the chain-specific removal action.
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    /// Remove the hook from the chain now.
    pub fn unregister(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl Drop for PanicRegistration {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for PanicRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicRegistration")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

/// What the hook does to the timer on panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicAction {
    /// Stop the timer so it cannot bite during panic handling.
    Disarm,
    /// Program bark and bite to the same deadline, then pet.
    Extend(Ticks),
}

/// Panic hook that disarms or extends the watchdog deadline.
#[derive(Debug)]
pub struct PanicDeadlineReprogrammer<R> {
    timer: Arc<WatchdogTimer<R>>,
    action: PanicAction,
}

impl<R: RegisterBlock> PanicDeadlineReprogrammer<R> {
    /// Build the hook for `config`.
    pub fn new(timer: Arc<WatchdogTimer<R>>, config: &WatchdogConfig) -> Self {
        let action = if config.panic_timeout_secs == 0 {
            PanicAction::Disarm
        } else {
            PanicAction::Extend(config.panic_deadline_ticks())
        };
        Self { timer, action }
    }

    /// Action taken on panic.
    #[must_use]
    pub fn action(&self) -> PanicAction {
        self.action
    }
}

impl<R: RegisterBlock> PanicHook for PanicDeadlineReprogrammer<R> {
    fn on_panic(&self) {
        match self.action {
            PanicAction::Disarm => self.timer.disarm(),
            PanicAction::Extend(deadline) => {
                self.timer.program_deadlines(deadline, deadline);
                self.timer.pet();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apwdog_timer::{Register, SimulatedRegisters};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_zero_timeout_disarms() {
        let timer = Arc::new(WatchdogTimer::new(SimulatedRegisters::new()));
        timer.arm(Ticks(100), Ticks(200));
        let hook = PanicDeadlineReprogrammer::new(Arc::clone(&timer), &WatchdogConfig::default());
        assert_eq!(hook.action(), PanicAction::Disarm);

        hook.on_panic();
        assert!(!timer.is_enabled());
        assert_eq!(timer.registers().pet_count(), 0);
    }

    #[test]
    fn test_timeout_extends_both_deadlines() {
        let timer = Arc::new(WatchdogTimer::new(SimulatedRegisters::new()));
        timer.arm(Ticks(100), Ticks(200));
        let config = WatchdogConfig {
            clock_hz: 1_000,
            panic_timeout_secs: 10,
            ..WatchdogConfig::default()
        };
        let hook = PanicDeadlineReprogrammer::new(Arc::clone(&timer), &config);

        hook.on_panic();
        let regs = timer.registers();
        assert_eq!(regs.value(Register::BarkTime), 14_000);
        assert_eq!(regs.value(Register::BiteTime), 14_000);
        assert_eq!(regs.pet_count(), 1);
        assert!(timer.is_enabled());
    }

    #[test]
    fn test_registration_unregisters_once() {
        let removed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&removed);
        let registration = PanicRegistration::new(move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        registration.unregister();
        assert!(removed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let removed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&removed);
        drop(PanicRegistration::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(removed.load(Ordering::SeqCst));
    }
}
