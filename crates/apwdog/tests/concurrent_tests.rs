//! Concurrency tests for the disable protocol and the pet path.

use apwdog::prelude::*;
use apwdog_timer::SimulatedRegisters;
use crossbeam::channel::{self, Sender};
use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn config(pet_time_ms: u32) -> WatchdogConfig {
    WatchdogConfig {
        clock_hz: 10_000,
        bark_time_ms: 60_000,
        pet_time_ms,
        ipi_ping: true,
        ..WatchdogConfig::default()
    }
}

#[test]
fn test_concurrent_disable_runs_once() -> TestResult {
    let host = HostPlatform::inline(4);
    let supervisor = Arc::new(Supervisor::attach(config(50_000), host.platform())?);
    let barrier = Arc::new(Barrier::new(8));
    let mut handles = vec![];

    for _ in 0..8 {
        let supervisor = Arc::clone(&supervisor);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            supervisor.disable()
        }));
    }

    for handle in handles {
        handle.join().map_err(|_| "disable thread panicked")??;
    }

    assert_eq!(host.secure_monitor.disable_calls(), 1);
    let disarms = host
        .registers
        .journal()
        .filter(|entry| *entry == (Register::Enable, 0))
        .count();
    assert_eq!(disarms, 2);
    assert!(!supervisor.is_enabled());
    Ok(())
}

#[test]
fn test_no_pet_after_disable_under_load() -> TestResult {
    let host = HostPlatform::inline(4);
    let supervisor = Arc::new(Supervisor::attach(config(5), host.platform())?);
    let mut handles = vec![];

    for _ in 0..4 {
        let supervisor = Arc::clone(&supervisor);
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                supervisor.pet_now();
                thread::sleep(Duration::from_micros(50));
            }
        }));
    }

    thread::sleep(Duration::from_millis(20));
    supervisor.disable()?;

    for handle in handles {
        handle.join().map_err(|_| "pet thread panicked")?;
    }
    let pets = host.registers.pet_count();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(host.registers.pet_count(), pets);
    assert!(!supervisor.has_pending_tick());
    Ok(())
}

#[test]
fn test_show_while_storing() -> TestResult {
    let host = HostPlatform::inline(2);
    let supervisor = Arc::new(Supervisor::attach(config(50_000), host.platform())?);

    let reader = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..100 {
                seen.push(supervisor.disabled_show());
            }
            seen
        })
    };
    supervisor.disabled_store("1")?;
    let seen = reader.join().map_err(|_| "reader panicked")?;

    assert!(seen.iter().all(|s| s == "0\n" || s == "1\n"));
    // once "1" is observed it never flips back
    let first_disabled = seen.iter().position(|s| s == "1\n").unwrap_or(seen.len());
    assert!(seen.iter().skip(first_disabled).all(|s| s == "1\n"));
    assert_eq!(supervisor.disabled_show(), "1\n");
    Ok(())
}

#[test]
fn test_threaded_cores_under_scheduler() -> TestResult {
    let cores = Arc::new(apwdog::host::ThreadedCores::new(4)?);
    let host = HostPlatform::new(cores, &CaptureLayout::default());
    let supervisor = Supervisor::attach(config(5), host.platform())?;

    thread::sleep(Duration::from_millis(100));
    let ticks = supervisor.tick_count();
    supervisor.detach();

    assert!(ticks >= 2);
    assert!(host.registers.pet_count() >= ticks);
    Ok(())
}

/// Holds the first armed status read open long enough for another thread
/// to run a whole disable.
struct StallingRegisters {
    inner: Arc<SimulatedRegisters>,
    armed: AtomicBool,
    entered: Sender<()>,
}

impl RegisterBlock for StallingRegisters {
    fn read(&self, reg: Register) -> u32 {
        if reg == Register::Status && self.armed.swap(false, Ordering::AcqRel) {
            if self.entered.send(()).is_err() {
                tracing::debug!("Nobody waiting for the stalled read");
            }
            thread::sleep(Duration::from_millis(100));
        }
        self.inner.read(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        self.inner.write(reg, value);
    }
}

#[test]
fn test_disable_waits_for_pet_in_flight() -> TestResult {
    let host = HostPlatform::inline(2);
    let (entered_tx, entered_rx) = channel::bounded(1);
    let registers = Arc::new(StallingRegisters {
        inner: Arc::clone(&host.registers),
        armed: AtomicBool::new(false),
        entered: entered_tx,
    });
    let Platform {
        clock,
        cores,
        secure_monitor,
        panic_chain,
        memory,
        system,
        power_up_reason,
        ..
    } = host.platform();
    let platform = Platform {
        registers: Some(Arc::clone(&registers)),
        clock,
        cores,
        secure_monitor,
        panic_chain,
        memory,
        system,
        power_up_reason,
    };
    let supervisor = Arc::new(Supervisor::attach(config(50_000), platform)?);

    registers.armed.store(true, Ordering::Release);
    let petter = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || supervisor.pet_now())
    };
    entered_rx.recv_timeout(Duration::from_secs(5))?;
    supervisor.disable()?;
    let petted = petter.join().map_err(|_| "pet thread panicked")?;

    assert!(petted);
    assert!(!supervisor.is_enabled());
    let journal: Vec<_> = host.registers.journal().collect();
    let last_pet = journal
        .iter()
        .rposition(|entry| *entry == (Register::Reset, 1))
        .ok_or("no pet recorded")?;
    let last_disarm = journal
        .iter()
        .rposition(|entry| *entry == (Register::Enable, 0))
        .ok_or("no disarm recorded")?;
    assert!(last_pet < last_disarm, "pet after final disarm: {journal:?}");
    assert_eq!(journal.last(), Some(&(Register::Enable, 0)));
    Ok(())
}
