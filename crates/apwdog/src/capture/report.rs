//! What the previous boot left in the capture region.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::format::{FirmwareDump, FirmwareHeader, KernelInfo, PerCoreRecord, SecureStatus, TaskSummary};
use super::layout::{CTX_REVISION, CTX_SIGNATURE, TZ_DUMP_MAGIC, TZ_DUMP_VERSION};
use super::unwind::Unwind;

/// Overall outcome of inspecting the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureVerdict {
    /// Nothing was captured and the boot was not a watchdog reset.
    Clean,
    /// Watchdog reset with an all-zero firmware area.
    MightBeBite,
    /// The firmware header does not match this kernel.
    FirmwareMismatch,
    /// The kernel info block does not match this kernel.
    KernelMismatch,
    /// Registers are available but no per-core traces.
    RegistersOnly,
    /// Registers and per-core traces are available.
    Complete,
}

impl CaptureVerdict {
    /// Short name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::MightBeBite => "might be watchdog bite",
            Self::FirmwareMismatch => "firmware dump mismatch",
            Self::KernelMismatch => "kernel dump mismatch",
            Self::RegistersOnly => "registers only",
            Self::Complete => "complete",
        }
    }

    /// Whether the region held a usable register dump.
    #[must_use]
    pub fn has_registers(self) -> bool {
        matches!(self, Self::KernelMismatch | Self::RegistersOnly | Self::Complete)
    }
}

impl fmt::Display for CaptureVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task and backtrace of one core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreTrace {
    /// Core index.
    pub core: u32,
    /// The task that was running.
    pub task: TaskSummary,
    /// Raw dumps and frames.
    pub unwind: Unwind,
}

/// Parsed contents of the capture region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    /// Overall outcome.
    pub verdict: CaptureVerdict,
    /// Firmware area has stray data although no core reported activity.
    pub suspect: bool,
    /// Core count this kernel expects.
    pub expected_cpu_count: u32,
    /// Region size this kernel expects.
    pub expected_size: u32,
    /// Header found at the start of the region.
    pub header: FirmwareHeader,
    /// Firmware dump, when the header matched.
    pub firmware: Option<FirmwareDump>,
    /// Kernel info, when the firmware dump matched.
    pub kernel: Option<KernelInfo>,
    /// Per-core copy records, when the kernel info matched.
    pub per_core: Vec<PerCoreRecord>,
    /// Per-core traces, when the copy completed.
    pub traces: Vec<CoreTrace>,
}

impl CaptureReport {
    pub(crate) fn new(verdict: CaptureVerdict, expected_cpu_count: u32, expected_size: u32) -> Self {
        Self {
            verdict,
            suspect: false,
            expected_cpu_count,
            expected_size,
            header: FirmwareHeader::default(),
            firmware: None,
            kernel: None,
            per_core: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// Whether there is anything to print.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.verdict == CaptureVerdict::Clean
    }

    fn write_firmware(&self, f: &mut fmt::Formatter<'_>, dump: &FirmwareDump) -> fmt::Result {
        f.write_str("sc_status: ")?;
        for status in dump.sc_status() {
            write!(f, "{status:#x} ")?;
        }
        writeln!(f)?;
        for (core, status) in dump.sc_status().iter().enumerate() {
            for line in SecureStatus(*status).describe(&format!("CPU{core}")) {
                writeln!(f, "{line}")?;
            }
        }
        f.write_str("wdt_sts: ")?;
        for sts in dump.wdt_sts() {
            write!(f, "0x{sts:08x} ")?;
        }
        writeln!(f)?;
        for (core, ctx) in dump.sc_ns().iter().enumerate() {
            ctx.saved.write_banks(f, &format!("CPU{core} nsec"))?;
        }
        dump.sec().write_banks(f, "sec")
    }

    fn write_kernel_mismatch(&self, f: &mut fmt::Formatter<'_>, info: &KernelInfo) -> fmt::Result {
        writeln!(f, "msm_wdt_ctx: linux dump buffer mismatch.")?;
        writeln!(
            f,
            "Expected: sig 0x{CTX_SIGNATURE:08x}, ver 0x{CTX_REVISION:08x} size 0x{:08x}",
            self.expected_size
        )?;
        writeln!(
            f,
            "Found:    sig 0x{:08x}, ver 0x{:08x} size 0x{:08x}",
            info.sig, info.rev_tz, info.size_tz
        )
    }

    fn write_copy_records(&self, f: &mut fmt::Formatter<'_>, info: &KernelInfo) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "ret 0x{:08x}", info.ret)?;
        writeln!(f)?;
        for (core, record) in self.per_core.iter().enumerate() {
            writeln!(
                f,
                "CPU{core}: ret {:#x} stack {:08x} {} {}",
                record.ret, record.stack_va, record.task, record.stack
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verdict {
            CaptureVerdict::Clean => return Ok(()),
            CaptureVerdict::MightBeBite => {
                writeln!(f)?;
                return writeln!(f, "*** Might be Watchdog Bite ***");
            }
            _ => {}
        }
        if self.suspect {
            writeln!(f, "*** Likely Bad Dump ***")?;
        }

        let Some(dump) = &self.firmware else {
            writeln!(f, "msm_wdt_ctx: tzbsp dump buffer mismatch.")?;
            writeln!(
                f,
                "Expected: magic 0x{TZ_DUMP_MAGIC:08x}, version {TZ_DUMP_VERSION}, cpu_count {}",
                self.expected_cpu_count
            )?;
            return writeln!(
                f,
                "Found:    magic 0x{:08x}, version {}, cpu_count {}",
                self.header.magic, self.header.version, self.header.cpu_count
            );
        };
        self.write_firmware(f, dump)?;

        let Some(info) = &self.kernel else {
            return Ok(());
        };
        if self.verdict == CaptureVerdict::KernelMismatch {
            return self.write_kernel_mismatch(f, info);
        }
        self.write_copy_records(f, info)?;

        if self.traces.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        for trace in &self.traces {
            writeln!(f, "CPU{}: {}", trace.core, trace.task)?;
            write!(f, "{}", trace.unwind)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
