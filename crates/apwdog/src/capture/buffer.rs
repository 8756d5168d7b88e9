//! Inspecting, re-arming and registering the capture region.

use tracing::{debug, error, info, warn};

use super::format::{FirmwareDump, KernelInfo, PerCoreRecord, TaskSummary};
use super::layout::{
    CAPTURE_COMPLETE, CTX_REVISION, CTX_SIGNATURE, CaptureLayout, FIRMWARE_AREA_SIZE,
    FIRMWARE_HEADER_SIZE, KERNEL_INFO_OFFSET, THREAD_INFO_DUMP_SIZE, THREAD_SIZE, TZ_DUMP_MAGIC,
    TZ_DUMP_VERSION,
};
use super::reader::{CaptureResult, RegionReader, RegionWriter};
use super::report::{CaptureReport, CaptureVerdict, CoreTrace};
use super::unwind::{StackImage, unwind};
use crate::config::WatchdogConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::platform::{PAGE_SIZE, PowerUpReason, RegsaveMemory, RegsaveRegion, SecureMonitor};

// Word positions inside the kernel info block.
const INFO_TSK_SIZE: usize = KERNEL_INFO_OFFSET;
const INFO_TI_TSK_OFFSET: usize = KERNEL_INFO_OFFSET + 4;
const INFO_SIZE: usize = KERNEL_INFO_OFFSET + 16;
const INFO_CPU_COUNT: usize = KERNEL_INFO_OFFSET + 20;
const INFO_REV: usize = KERNEL_INFO_OFFSET + 28;
const INFO_SIG: usize = KERNEL_INFO_OFFSET + 32;

fn expected_size(layout: &CaptureLayout) -> u32 {
    u32::try_from(layout.total_size()).unwrap_or(u32::MAX)
}

/// Parse what the previous boot left in `bytes`.
///
/// Format mismatches are reported through [`CaptureReport::verdict`]. Per-core
/// traces are produced only when the previous boot ended in a watchdog
/// reset and the secure side marked the copy complete.
///
/// # Errors
///
/// Returns an error if `bytes` is shorter than the structures it claims to
/// hold.
pub fn inspect(
    bytes: &[u8],
    layout: &CaptureLayout,
    reason: PowerUpReason,
) -> CaptureResult<CaptureReport> {
    let reader = RegionReader::new(bytes);
    let mut report = CaptureReport::new(
        CaptureVerdict::FirmwareMismatch,
        layout.cpu_count,
        expected_size(layout),
    );

    let Some(dump) = FirmwareDump::parse(&reader, layout.cpu_count)? else {
        return Ok(report);
    };
    report.header = dump.header();

    if !dump.has_activity() {
        if !reason.is_watchdog_reset() {
            report.verdict = CaptureVerdict::Clean;
            return Ok(report);
        }
        let area = reader.bytes(FIRMWARE_HEADER_SIZE, FIRMWARE_AREA_SIZE - FIRMWARE_HEADER_SIZE)?;
        if area.iter().all(|b| *b == 0) {
            report.verdict = CaptureVerdict::MightBeBite;
            return Ok(report);
        }
        report.suspect = true;
    }

    let header = report.header;
    if header.magic != TZ_DUMP_MAGIC
        || header.version != TZ_DUMP_VERSION
        || header.cpu_count != layout.cpu_count
    {
        return Ok(report);
    }
    let contexts = dump.sc_ns().to_vec();
    report.firmware = Some(dump);

    let info = KernelInfo::parse(&reader)?;
    report.kernel = Some(info);
    if info.sig != CTX_SIGNATURE || info.rev_tz != CTX_REVISION || info.size_tz != report.expected_size {
        report.verdict = CaptureVerdict::KernelMismatch;
        return Ok(report);
    }

    report.per_core = (0..layout.cores())
        .map(|core| PerCoreRecord::parse(&reader, layout.per_core_offset(core)))
        .collect::<CaptureResult<_>>()?;

    if info.ret != CAPTURE_COMPLETE || !reason.is_watchdog_reset() {
        report.verdict = CaptureVerdict::RegistersOnly;
        return Ok(report);
    }

    let mut traces = Vec::new();
    for (core, (record, ctx)) in report.per_core.iter().zip(&contexts).enumerate() {
        if record.ret != CAPTURE_COMPLETE {
            continue;
        }
        let task = reader.view(layout.task_offset(core), layout.task_record_size as usize)?;
        let stack = reader.view(layout.stack_offset(core), THREAD_SIZE)?;
        let thread_info = stack.view(0, THREAD_INFO_DUMP_SIZE)?;
        traces.push(CoreTrace {
            core: u32::try_from(core).unwrap_or(u32::MAX),
            task: TaskSummary::parse(&task, layout.task_fields, &thread_info, layout.thread_info)?,
            unwind: unwind(
                &ctx.saved,
                StackImage::new(record.stack_va, stack),
                layout.thread_info,
            )?,
        });
    }
    report.traces = traces;
    report.verdict = CaptureVerdict::Complete;
    Ok(report)
}

/// Zero the region and stamp a fresh kernel info block.
///
/// # Errors
///
/// Returns an error if `bytes` does not cover the first page.
pub fn restamp(bytes: &mut [u8], layout: &CaptureLayout) -> CaptureResult<()> {
    let mut writer = RegionWriter::new(bytes);
    writer.zero();
    writer.put_u32(INFO_TSK_SIZE, layout.task_record_size)?;
    writer.put_u32(INFO_TI_TSK_OFFSET, layout.ti_task_offset)?;
    writer.put_u32(INFO_SIZE, expected_size(layout))?;
    writer.put_u32(INFO_CPU_COUNT, layout.cpu_count)?;
    writer.put_u32(INFO_REV, CTX_REVISION)?;
    writer.put_u32(INFO_SIG, CTX_SIGNATURE)
}

/// Outcome of setting up the register-save area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarkDumpSetup {
    /// Area handed to the secure side, if any memory was found.
    pub region: Option<RegsaveRegion>,
    /// What the previous boot left behind, if the full region was mapped.
    pub report: Option<CaptureReport>,
    /// Why the mapped region could not be parsed.
    pub replay_error: Option<WatchdogError>,
}

/// Allocate the register-save area, replay and re-arm any previous
/// capture, and register the area with the secure side.
///
/// Nothing here is fatal: without an area the secure side resets the board
/// without saving registers.
pub fn configure_bark_dump(
    config: &WatchdogConfig,
    memory: &dyn RegsaveMemory,
    monitor: &dyn SecureMonitor,
    reason: PowerUpReason,
) -> BarkDumpSetup {
    let captured = config
        .context_capture
        .then(|| allocate_capture(&config.capture_layout, memory, reason))
        .flatten();
    let setup = match captured {
        Some((region, replay)) => {
            let (report, replay_error) = match replay {
                Some(Ok(report)) => (Some(report), None),
                Some(Err(e)) => (None, Some(e)),
                None => (None, None),
            };
            BarkDumpSetup {
                region: Some(region),
                report,
                replay_error,
            }
        }
        None => BarkDumpSetup {
            region: memory.allocate_page().map(|phys| RegsaveRegion {
                phys,
                size: PAGE_SIZE,
            }),
            ..BarkDumpSetup::default()
        },
    };

    let Some(region) = setup.region else {
        error!("Allocating register save space failed. Registers won't be dumped on a dog bite");
        return setup;
    };
    if let Err(status) = monitor.set_regsave(region) {
        error!(
            status,
            "Setting register save address failed. Registers won't be dumped on a dog bite"
        );
    }
    if let Err(status) = monitor.register_dump_region(region) {
        error!(
            status,
            "Setting cpu dump region failed. Registers won't be dumped during cpu hang"
        );
    }
    setup
}

/// Reserve the full capture region and replay it. `None` falls back to a page.
fn allocate_capture(
    layout: &CaptureLayout,
    memory: &dyn RegsaveMemory,
    reason: PowerUpReason,
) -> Option<(RegsaveRegion, Option<WatchdogResult<CaptureReport>>)> {
    let size = layout.total_size();
    let Some(reserved) = memory.reservation_size() else {
        error!("Capture reservation not found");
        return None;
    };
    if reserved < size {
        error!(reserved, needed = size, "Reserved capture buffer too small");
        return None;
    }
    let Some(phys) = memory.allocate_contiguous(size) else {
        error!(size, "Failed to allocate capture buffer from reservation");
        return None;
    };
    let region = RegsaveRegion { phys, size };
    debug!(phys, size, reserved, "Capture buffer allocated");

    let mut replay = None;
    let mapped = memory.with_mapping(phys, size, &mut |bytes: &mut [u8]| {
        replay = Some(inspect(bytes, layout, reason).map_err(WatchdogError::from));
        if let Err(e) = restamp(bytes, layout) {
            warn!(error = %e, "Failed to re-arm capture buffer");
        }
    });
    if !mapped {
        error!(phys, "Cannot map capture buffer");
        return Some((region, None));
    }

    match &replay {
        Some(Ok(report)) => {
            debug!(verdict = %report.verdict, "Previous capture inspected");
            for line in report.to_string().lines() {
                info!("{line}");
            }
        }
        Some(Err(e)) => warn!(error = %e, "Capture buffer unreadable"),
        None => {}
    }
    Some((region, replay))
}
