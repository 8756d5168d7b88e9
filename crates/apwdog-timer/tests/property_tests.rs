//! Property-based tests for timer register invariants.

use apwdog_timer::prelude::*;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_arm_then_pet_leaves_non_negative_slack(
        bark in 1u32..0x0010_0000,
        margin in 1u32..0x0010_0000,
        running in 0u32..0x000F_FFFF,
    ) {
        let bite = bark + margin;
        let timer = WatchdogTimer::new(SimulatedRegisters::new());
        timer.registers().set_count(running);

        timer.arm(Ticks(bark), Ticks(bite));
        timer.pet();

        let observed = timer.read_status_counter();
        let slack = i64::from(bark) - i64::from(observed.get());
        prop_assert!(slack >= 0);
        prop_assert!(timer.snapshot().bark_time < timer.snapshot().bite_time);
    }

    #[test]
    fn test_debounced_read_returns_first_agreeing_pair(
        glitches in prop::collection::vec(0u32..0x000F_FFFF, 0..6),
        settled in 0u32..0x000F_FFFF,
    ) {
        // Consecutive distinct samples followed by a stable pair.
        let mut samples: Vec<u32> = Vec::new();
        for g in glitches {
            if samples.last() != Some(&g) && g != settled {
                samples.push(g);
            }
        }
        samples.push(settled);
        samples.push(settled);

        let regs = SimulatedRegisters::new();
        regs.script_counts(&samples).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let timer = WatchdogTimer::new(regs);

        prop_assert_eq!(timer.read_status_counter(), Ticks(settled));
    }

    #[test]
    fn test_status_encoding_masks_to_twenty_bits(raw in any::<u32>()) {
        let regs = SimulatedRegisters::new();
        regs.set_count(raw);
        let timer = WatchdogTimer::new(regs);
        prop_assert!(timer.read_status_counter().get() <= 0x000F_FFFF);
    }
}
