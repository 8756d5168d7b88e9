//! Benchmarks for the pet path and capture inspection.

use apwdog::capture::inspect;
use apwdog::capture::layout::CAPTURE_COMPLETE;
use apwdog::host::{
    CaptureImage, InlineCores, ManualClock, RecordingSystemControl, complete_record,
};
use apwdog::prelude::*;
use apwdog::{PetScheduler, WatchdogDevice};
use apwdog_timer::SimulatedRegisters;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

fn device(ipi_ping: bool) -> Arc<WatchdogDevice<SimulatedRegisters>> {
    let config = WatchdogConfig {
        clock_hz: 32_765,
        bark_time_ms: 11_000,
        pet_time_ms: 10_000,
        ipi_ping,
        ..WatchdogConfig::default()
    };
    Arc::new(WatchdogDevice::new(
        Arc::new(WatchdogTimer::new(SimulatedRegisters::new())),
        config,
        Arc::new(ManualClock::new()),
        Arc::new(InlineCores::new(4)),
        Arc::new(RecordingSystemControl::new()),
    ))
}

fn bench_pet(c: &mut Criterion) {
    let mut group = c.benchmark_group("pet");

    let plain = device(false);
    plain.timer().registers().set_count(1234);
    group.bench_function("device_pet", |b| {
        b.iter(|| black_box(plain.pet()));
    });

    let scheduler = PetScheduler::new(device(true));
    group.bench_function("scheduler_tick_4_cores", |b| {
        b.iter(|| black_box(scheduler.tick()));
    });

    group.finish();
}

fn bench_liveness(c: &mut Criterion) {
    let mut group = c.benchmark_group("liveness");

    let device = device(true);
    if let Some(liveness) = device.liveness() {
        group.bench_function("run_round_inline", |b| {
            b.iter(|| black_box(liveness.run_round()));
        });
    }

    group.finish();
}

fn bench_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture");

    let layout = CaptureLayout::default();
    let mut image = CaptureImage::new(layout);
    let built = image
        .valid_header()
        .and_then(|i| i.wdt_sts(0, 3))
        .and_then(|i| i.kernel_info(CAPTURE_COMPLETE))
        .and_then(|i| i.per_core(0, &complete_record(0xc0a0_0000)))
        .and_then(|i| i.task(0, "swapper/0", 0, 0, 0));
    if built.is_ok() {
        let bytes = image.into_bytes();
        group.bench_function("inspect_complete", |b| {
            b.iter(|| black_box(inspect(&bytes, &layout, PowerUpReason::WatchdogReset)));
        });
    }

    let empty = vec![0u8; layout.total_size()];
    group.bench_function("inspect_clean", |b| {
        b.iter(|| black_box(inspect(&empty, &layout, PowerUpReason::Normal)));
    });

    group.finish();
}

criterion_group!(benches, bench_pet, bench_liveness, bench_capture);
criterion_main!(benches);
