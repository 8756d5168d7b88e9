//! Property-based tests for slack accounting, forced resets and capture parsing.

use apwdog::capture::inspect;
use apwdog::capture::layout::CAPTURE_COMPLETE;
use apwdog::host::{
    CaptureImage, InlineCores, ManualClock, RecordingSystemControl, complete_record,
};
use apwdog::prelude::*;
use apwdog::{MAX_RESET_TIMEOUT_SECS, PetScheduler, WatchdogDevice};
use apwdog_timer::SimulatedRegisters;
use proptest::prelude::*;
use std::sync::Arc;

fn device(registers: &Arc<SimulatedRegisters>) -> Arc<WatchdogDevice<Arc<SimulatedRegisters>>> {
    let config = WatchdogConfig {
        clock_hz: 10_000,
        bark_time_ms: 1_000,
        pet_time_ms: 500,
        ipi_ping: true,
        ..WatchdogConfig::default()
    };
    Arc::new(WatchdogDevice::new(
        Arc::new(WatchdogTimer::new(Arc::clone(registers))),
        config,
        Arc::new(ManualClock::new()),
        Arc::new(InlineCores::new(2)),
        Arc::new(RecordingSystemControl::new()),
    ))
}

fn captured_bytes(layout: CaptureLayout) -> Result<Vec<u8>, TestCaseError> {
    let mut image = CaptureImage::new(layout);
    image
        .valid_header()
        .and_then(|i| i.wdt_sts(0, 3))
        .and_then(|i| i.kernel_info(CAPTURE_COMPLETE))
        .and_then(|i| i.per_core(0, &complete_record(0xc0a0_0000)))
        .and_then(|i| i.task(0, "init", 1, 1, 1))
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    Ok(image.into_bytes())
}

fn reason() -> impl Strategy<Value = PowerUpReason> {
    prop_oneof![
        Just(PowerUpReason::Normal),
        Just(PowerUpReason::WatchdogReset),
        Just(PowerUpReason::Other),
    ]
}

proptest! {
    #[test]
    fn test_min_slack_never_increases(
        counts in prop::collection::vec(0u32..10_000, 1..24),
    ) {
        let registers = Arc::new(SimulatedRegisters::new());
        let device = device(&registers);
        let scheduler = PetScheduler::new(Arc::clone(&device));

        let mut previous = i64::MAX;
        for count in counts {
            registers.set_count(count);
            scheduler.tick();
            let minimum = device.stats().min_slack_ticks().ok_or_else(|| {
                TestCaseError::fail("no slack recorded after a pet")
            })?;
            prop_assert!(minimum <= previous);
            prop_assert!(minimum <= 10_000 - i64::from(count));
            previous = minimum;
        }
    }

    #[test]
    fn test_force_reset_clamps_timeout(timeout in any::<u32>()) {
        let registers = Arc::new(SimulatedRegisters::new());
        let device = device(&registers);

        let error = device.force_reset(timeout);

        let expected = timeout.min(MAX_RESET_TIMEOUT_SECS);
        prop_assert_eq!(error, WatchdogError::ResetFailed { timeout_secs: expected });
        let armed: Vec<_> = registers.journal().take(2).collect();
        prop_assert_eq!(
            armed,
            vec![
                (Register::BarkTime, expected * 10_000),
                (Register::BiteTime, (expected + 2) * 10_000),
            ]
        );
    }

    #[test]
    fn test_inspect_survives_corrupted_regions(
        writes in prop::collection::vec((0usize..16_384, any::<u8>()), 0..64),
        reason in reason(),
        dual in any::<bool>(),
    ) {
        let layout = CaptureLayout {
            cpu_count: if dual { 2 } else { 4 },
            ..CaptureLayout::default()
        };
        let mut bytes = captured_bytes(layout)?;
        for (offset, value) in writes {
            if let Some(byte) = bytes.get_mut(offset) {
                *byte = value;
            }
        }

        let report = inspect(&bytes, &layout, reason)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let text = report.to_string();
        prop_assert_eq!(text.is_empty(), report.is_empty());
        prop_assert!(report.traces.len() <= layout.cores());
    }
}
