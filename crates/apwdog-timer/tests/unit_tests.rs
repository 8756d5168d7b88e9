//! Unit tests for the timer register interface.

#![cfg(test)]

use apwdog_timer::prelude::*;

type TestResult = Result<(), Box<dyn std::error::Error>>;

mod arming {
    use super::*;

    #[test]
    fn test_initial_block_is_stopped() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        assert!(!timer.is_enabled());
        assert_eq!(timer.snapshot(), RegisterSnapshot::default());
    }

    #[test]
    fn test_arm_writes_bark_before_bite_before_enable() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(360_415), Ticks(458_710));

        let journal: Vec<_> = timer.registers().journal().collect();
        assert_eq!(
            journal,
            [
                (Register::BarkTime, 360_415),
                (Register::BiteTime, 458_710),
                (Register::Enable, 1),
            ]
        );
    }

    #[test]
    fn test_program_deadlines_keeps_enable_bit() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.program_deadlines(Ticks(5), Ticks(9));
        assert!(!timer.is_enabled());
        timer.enable();
        assert!(timer.is_enabled());
        timer.program_deadlines(Ticks(6), Ticks(10));
        assert!(timer.is_enabled());
    }
}

mod petting {
    use super::*;

    #[test]
    fn test_pet_restarts_count() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(1000), Ticks(2000));
        timer.registers().set_count(750);
        assert_eq!(timer.read_status_counter(), Ticks(750));

        timer.pet();
        assert_eq!(timer.read_status_counter(), Ticks(0));
        assert_eq!(timer.registers().pet_count(), 1);
    }

    #[test]
    fn test_disarm_does_not_pet() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(1000), Ticks(2000));
        timer.disarm();
        assert_eq!(timer.registers().pet_count(), 0);
        assert_eq!(timer.registers().write_count(Register::Enable), 2);
    }
}

mod status {
    use super::*;

    #[test]
    fn test_glitching_counter_is_retried() -> TestResult {
        let regs = SimulatedRegisters::new();
        regs.script_counts(&[0x0_0FFF, 0x1_0000, 0x1_0001, 0x1_0001])?;
        let timer = WatchdogTimer::new(regs);

        assert_eq!(timer.read_status_counter(), Ticks(0x1_0001));
        Ok(())
    }

    #[test]
    fn test_stable_counter_needs_two_reads() {
        let regs = SimulatedRegisters::new();
        regs.set_count(321);
        let timer = WatchdogTimer::new(regs);

        assert_eq!(timer.read_status_counter(), Ticks(321));
        assert_eq!(timer.registers().status_reads(), 2);
    }

    #[test]
    fn test_snapshot_display() {
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.arm(Ticks(0x10), Ticks(0x20));
        assert_eq!(
            timer.snapshot().to_string(),
            "STS: 0x1, CTL: 0x1, BARK TIME: 0x10, BITE TIME: 0x20"
        );
    }
}
