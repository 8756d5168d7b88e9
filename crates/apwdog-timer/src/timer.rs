//! `WatchdogTimer`, the single writer-facing front end of the register block.
//!
//! Every mutating method finishes with a barrier. None of them lock or
//! allocate, so the same instance may be driven from the pet task, the
//! bark interrupt and the panic notifier.

use crate::registers::{
    Register, RegisterBlock, RegisterSnapshot, Ticks, decode_status_count,
};

/// Two-stage watchdog timer.
///
/// # State Machine
///
/// ```text
/// Stopped ──arm()/enable()──► Counting ──pet()──► Counting (count = 0)
///    ▲                            │
///    └─────────disarm()───────────┘
/// ```
///
/// While counting, the hardware raises the bark interrupt once the count
/// reaches the bark deadline and resets the board at the bite deadline.
#[derive(Debug)]
pub struct WatchdogTimer<R> {
    regs: R,
}

impl<R: RegisterBlock> WatchdogTimer<R> {
    /// Wrap a register block.
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Borrow the underlying register block.
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Program both deadlines without touching the enable bit.
    pub fn program_deadlines(&self, bark: Ticks, bite: Ticks) {
        self.regs.write(Register::BarkTime, bark.get());
        self.regs.write(Register::BiteTime, bite.get());
        self.regs.barrier();
    }

    /// Program both deadlines and start counting.
    ///
    /// Callers keep `bark < bite`; the panic path is the only one allowed
    /// to program them equal.
    pub fn arm(&self, bark: Ticks, bite: Ticks) {
        self.regs.write(Register::BarkTime, bark.get());
        self.regs.write(Register::BiteTime, bite.get());
        self.regs.write(Register::Enable, 1);
        self.regs.barrier();
    }

    /// Start counting with the deadlines already programmed.
    pub fn enable(&self) {
        self.regs.write(Register::Enable, 1);
        self.regs.barrier();
    }

    /// Restart the countdown.
    pub fn pet(&self) {
        self.regs.write(Register::Reset, 1);
        self.regs.barrier();
    }

    /// Stop counting. No deadline is active afterwards.
    pub fn disarm(&self) {
        self.regs.write(Register::Enable, 0);
        self.regs.barrier();
    }

    /// Quiesce the timer across a system suspend.
    pub fn suspend(&self) {
        self.regs.write(Register::Reset, 1);
        self.regs.write(Register::Enable, 0);
        self.regs.barrier();
    }

    /// Restart counting after a system resume.
    pub fn resume(&self) {
        self.regs.write(Register::Enable, 1);
        self.regs.write(Register::Reset, 1);
        self.regs.barrier();
    }

    /// Force the second stage: bite deadline one tick out, then restart.
    pub fn trigger_bite(&self) {
        self.regs.write(Register::BiteTime, 1);
        self.regs.barrier();
        self.regs.write(Register::Reset, 1);
        self.regs.barrier();
    }

    /// Read the running tick count.
    ///
    /// The status register crosses a clock domain and may be sampled
    /// mid-update, so it is read until two consecutive samples agree.
    pub fn read_status_counter(&self) -> Ticks {
        let mut previous = decode_status_count(self.regs.read(Register::Status));
        loop {
            let current = decode_status_count(self.regs.read(Register::Status));
            if current == previous {
                return current;
            }
            previous = current;
        }
    }

    /// Whether the enable bit is set.
    pub fn is_enabled(&self) -> bool {
        self.regs.read(Register::Enable) != 0
    }

    /// Capture the readable registers.
    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            status: self.regs.read(Register::Status),
            enable: self.regs.read(Register::Enable),
            bark_time: self.regs.read(Register::BarkTime),
            bite_time: self.regs.read(Register::BiteTime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedRegisters;

    #[test]
    fn test_arm_programs_deadlines_and_enables() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(100), Ticks(200));

        let snap = timer.snapshot();
        assert_eq!(snap.bark_time, 100);
        assert_eq!(snap.bite_time, 200);
        assert!(timer.is_enabled());
        assert_eq!(timer.registers().pet_count(), 0);
    }

    #[test]
    fn test_disarm_clears_enable() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(100), Ticks(200));
        timer.disarm();
        assert!(!timer.is_enabled());
    }

    #[test]
    fn test_every_write_is_followed_by_barrier() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(1), Ticks(2));
        timer.pet();
        timer.disarm();
        assert_eq!(timer.registers().barrier_count(), 3);
        assert!(!timer.registers().has_unfenced_writes());
    }

    #[test]
    fn test_status_read_waits_for_agreement() -> Result<(), crate::error::TimerError> {
        let regs = SimulatedRegisters::new();
        regs.script_counts(&[10, 11, 12, 12])?;
        let timer = WatchdogTimer::new(regs);

        assert_eq!(timer.read_status_counter(), Ticks(12));
        assert_eq!(timer.registers().status_reads(), 4);
        Ok(())
    }

    #[test]
    fn test_trigger_bite_sets_minimal_bite_then_pets() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(100), Ticks(200));
        timer.trigger_bite();

        assert_eq!(timer.snapshot().bite_time, 1);
        assert_eq!(timer.registers().pet_count(), 1);
    }

    #[test]
    fn test_suspend_resume() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(100), Ticks(200));
        timer.suspend();
        assert!(!timer.is_enabled());
        timer.resume();
        assert!(timer.is_enabled());
        assert_eq!(timer.registers().pet_count(), 2);
    }
}
