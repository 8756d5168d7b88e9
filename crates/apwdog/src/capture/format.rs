//! Structures stored in the capture region.

use std::fmt;

use super::layout::{
    CPU_CONTEXT_WORDS, FIRMWARE_HEADER_SIZE, KERNEL_INFO_OFFSET, MONITOR_CONTEXT_WORDS,
    TaskFieldOffsets, ThreadInfoOffsets,
};
use super::reader::{CaptureResult, RegionReader};

/// Register bank saved by the secure monitor for one core.
#[expect(missing_docs, reason = "fields are the banked register names")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorContext {
    pub mon_lr: u32,
    pub mon_spsr: u32,
    pub usr_r0: u32,
    pub usr_r1: u32,
    pub usr_r2: u32,
    pub usr_r3: u32,
    pub usr_r4: u32,
    pub usr_r5: u32,
    pub usr_r6: u32,
    pub usr_r7: u32,
    pub usr_r8: u32,
    pub usr_r9: u32,
    pub usr_r10: u32,
    pub usr_r11: u32,
    pub usr_r12: u32,
    pub usr_r13: u32,
    pub usr_r14: u32,
    pub irq_spsr: u32,
    pub irq_r13: u32,
    pub irq_r14: u32,
    pub svc_spsr: u32,
    pub svc_r13: u32,
    pub svc_r14: u32,
    pub abt_spsr: u32,
    pub abt_r13: u32,
    pub abt_r14: u32,
    pub und_spsr: u32,
    pub und_r13: u32,
    pub und_r14: u32,
    pub fiq_spsr: u32,
    pub fiq_r8: u32,
    pub fiq_r9: u32,
    pub fiq_r10: u32,
    pub fiq_r11: u32,
    pub fiq_r12: u32,
    pub fiq_r13: u32,
    pub fiq_r14: u32,
}

impl MonitorContext {
    /// Decode a bank from its words in storage order.
    #[must_use]
    pub fn from_words(words: [u32; MONITOR_CONTEXT_WORDS]) -> Self {
        let [
            mon_lr,
            mon_spsr,
            usr_r0,
            usr_r1,
            usr_r2,
            usr_r3,
            usr_r4,
            usr_r5,
            usr_r6,
            usr_r7,
            usr_r8,
            usr_r9,
            usr_r10,
            usr_r11,
            usr_r12,
            usr_r13,
            usr_r14,
            irq_spsr,
            irq_r13,
            irq_r14,
            svc_spsr,
            svc_r13,
            svc_r14,
            abt_spsr,
            abt_r13,
            abt_r14,
            und_spsr,
            und_r13,
            und_r14,
            fiq_spsr,
            fiq_r8,
            fiq_r9,
            fiq_r10,
            fiq_r11,
            fiq_r12,
            fiq_r13,
            fiq_r14,
        ] = words;
        Self {
            mon_lr,
            mon_spsr,
            usr_r0,
            usr_r1,
            usr_r2,
            usr_r3,
            usr_r4,
            usr_r5,
            usr_r6,
            usr_r7,
            usr_r8,
            usr_r9,
            usr_r10,
            usr_r11,
            usr_r12,
            usr_r13,
            usr_r14,
            irq_spsr,
            irq_r13,
            irq_r14,
            svc_spsr,
            svc_r13,
            svc_r14,
            abt_spsr,
            abt_r13,
            abt_r14,
            und_spsr,
            und_r13,
            und_r14,
            fiq_spsr,
            fiq_r8,
            fiq_r9,
            fiq_r10,
            fiq_r11,
            fiq_r12,
            fiq_r13,
            fiq_r14,
        }
    }

    /// Words in storage order.
    #[must_use]
    pub fn to_words(&self) -> [u32; MONITOR_CONTEXT_WORDS] {
        let Self {
            mon_lr,
            mon_spsr,
            usr_r0,
            usr_r1,
            usr_r2,
            usr_r3,
            usr_r4,
            usr_r5,
            usr_r6,
            usr_r7,
            usr_r8,
            usr_r9,
            usr_r10,
            usr_r11,
            usr_r12,
            usr_r13,
            usr_r14,
            irq_spsr,
            irq_r13,
            irq_r14,
            svc_spsr,
            svc_r13,
            svc_r14,
            abt_spsr,
            abt_r13,
            abt_r14,
            und_spsr,
            und_r13,
            und_r14,
            fiq_spsr,
            fiq_r8,
            fiq_r9,
            fiq_r10,
            fiq_r11,
            fiq_r12,
            fiq_r13,
            fiq_r14,
        } = *self;
        [
            mon_lr,
            mon_spsr,
            usr_r0,
            usr_r1,
            usr_r2,
            usr_r3,
            usr_r4,
            usr_r5,
            usr_r6,
            usr_r7,
            usr_r8,
            usr_r9,
            usr_r10,
            usr_r11,
            usr_r12,
            usr_r13,
            usr_r14,
            irq_spsr,
            irq_r13,
            irq_r14,
            svc_spsr,
            svc_r13,
            svc_r14,
            abt_spsr,
            abt_r13,
            abt_r14,
            und_spsr,
            und_r13,
            und_r14,
            fiq_spsr,
            fiq_r8,
            fiq_r9,
            fiq_r10,
            fiq_r11,
            fiq_r12,
            fiq_r13,
            fiq_r14,
        ]
    }

    /// Read a bank at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bank leaves the region.
    pub fn parse(reader: &RegionReader<'_>, offset: usize) -> CaptureResult<Self> {
        reader.words::<MONITOR_CONTEXT_WORDS>(offset).map(Self::from_words)
    }

    /// Print the bank under `label`, one mode per line.
    pub fn write_banks(&self, f: &mut fmt::Formatter<'_>, label: &str) -> fmt::Result {
        writeln!(f, "{label}")?;
        writeln!(
            f,
            "\tr12: {:08x}  r11: {:08x}  r10: {:08x}  r9 : {:08x}  r8 : {:08x}",
            self.usr_r12, self.usr_r11, self.usr_r10, self.usr_r9, self.usr_r8
        )?;
        writeln!(
            f,
            "\tr7 : {:08x}  r6 : {:08x}  r5 : {:08x}  r4 : {:08x}",
            self.usr_r7, self.usr_r6, self.usr_r5, self.usr_r4
        )?;
        writeln!(
            f,
            "\tr3 : {:08x}  r2 : {:08x}  r1 : {:08x}  r0 : {:08x}",
            self.usr_r3, self.usr_r2, self.usr_r1, self.usr_r0
        )?;
        writeln!(f, "MON:\tlr : {:08x}  spsr: {:08x}", self.mon_lr, self.mon_spsr)?;
        for (mode, lr, sp, spsr) in [
            ("SVC", self.svc_r14, self.svc_r13, self.svc_spsr),
            ("IRQ", self.irq_r14, self.irq_r13, self.irq_spsr),
            ("ABT", self.abt_r14, self.abt_r13, self.abt_spsr),
            ("UND", self.und_r14, self.und_r13, self.und_spsr),
            ("FIQ", self.fiq_r14, self.fiq_r13, self.fiq_spsr),
        ] {
            writeln!(f, "{mode}:\tlr : {lr:08x}  sp : {sp:08x}  spsr : {spsr:08x}")?;
        }
        writeln!(
            f,
            "\tr12: {:08x}  r11: {:08x}  r10: {:08x}  r9 : {:08x}  r8 : {:08x}",
            self.fiq_r12, self.fiq_r11, self.fiq_r10, self.fiq_r9, self.fiq_r8
        )?;
        writeln!(f, "USR:\tlr : {:08x}  sp : {:08x}", self.usr_r14, self.usr_r13)
    }
}

/// Non-secure context of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuContext {
    /// Saved register bank.
    pub saved: MonitorContext,
    /// Monitor stack pointer.
    pub mon_sp: u32,
    /// Program counter when the watchdog fired.
    pub wdog_pc: u32,
}

impl CpuContext {
    /// Read a context at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the context leaves the region.
    pub fn parse(reader: &RegionReader<'_>, offset: usize) -> CaptureResult<Self> {
        let saved = MonitorContext::parse(reader, offset)?;
        let [mon_sp, wdog_pc] = reader.words::<2>(offset + MONITOR_CONTEXT_WORDS * 4)?;
        Ok(Self {
            saved,
            mon_sp,
            wdog_pc,
        })
    }
}

/// Per-core status flags reported by the secure monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecureStatus(pub u32);

impl SecureStatus {
    /// The core was in the non-secure world.
    pub const NON_SECURE: u32 = 0x01;
    /// The core experienced the watchdog timeout.
    pub const WDT: u32 = 0x02;
    /// Another core experienced the timeout.
    pub const SGI: u32 = 0x04;
    /// The bark hit during a secure warm boot.
    pub const WARM_BOOT: u32 = 0x08;

    fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Human-readable status lines for `label`.
    #[must_use]
    pub fn describe(self, label: &str) -> Vec<String> {
        if self.0 == 0 {
            return vec![format!("{label}: probably didn't finish dump.")];
        }
        let world = if self.has(Self::NON_SECURE) { "non-" } else { "" };
        let mut lines = vec![format!("{label}: was in {world}secure world.")];
        if self.has(Self::WDT) {
            lines.push(format!("{label}: experienced a watchdog timeout."));
        }
        if self.has(Self::SGI) {
            lines.push(format!(
                "{label}: some other core experienced a watchdog timeout."
            ));
        }
        if self.has(Self::WARM_BOOT) {
            lines.push(format!("{label}: WDT bark occured during TZ warm boot."));
        }
        lines
    }
}

/// Firmware dump header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareHeader {
    /// Format magic.
    pub magic: u32,
    /// Format version.
    pub version: u32,
    /// Cores described.
    pub cpu_count: u32,
}

/// Firmware dump for `N` cores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDump<const N: usize> {
    /// Header.
    pub header: FirmwareHeader,
    /// Per-core status flags.
    pub sc_status: [u32; N],
    /// Per-core non-secure contexts.
    pub sc_ns: [CpuContext; N],
    /// The secure context.
    pub sec: MonitorContext,
    /// Per-core watchdog status.
    pub wdt_sts: [u32; N],
}

impl<const N: usize> CoreDump<N> {
    /// Decode from the start of the region.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump leaves the region.
    pub fn parse(reader: &RegionReader<'_>) -> CaptureResult<Self> {
        let [magic, version, cpu_count] = reader.words::<3>(0)?;
        let sc_status = reader.words::<N>(FIRMWARE_HEADER_SIZE)?;
        let sc_ns_offset = FIRMWARE_HEADER_SIZE + N * 4;
        let mut sc_ns = [CpuContext::default(); N];
        for (core, slot) in sc_ns.iter_mut().enumerate() {
            *slot = CpuContext::parse(reader, sc_ns_offset + core * CPU_CONTEXT_WORDS * 4)?;
        }
        let sec_offset = sc_ns_offset + N * CPU_CONTEXT_WORDS * 4;
        let sec = MonitorContext::parse(reader, sec_offset)?;
        let wdt_sts = reader.words::<N>(sec_offset + MONITOR_CONTEXT_WORDS * 4)?;
        Ok(Self {
            header: FirmwareHeader {
                magic,
                version,
                cpu_count,
            },
            sc_status,
            sc_ns,
            sec,
            wdt_sts,
        })
    }
}

/// Firmware dump, shaped by the number of cores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareDump {
    /// Two-core dump.
    Dual(CoreDump<2>),
    /// Four-core dump.
    Quad(CoreDump<4>),
}

impl FirmwareDump {
    /// Decode a dump for `cpu_count` cores. `None` for unsupported counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump leaves the region.
    pub fn parse(reader: &RegionReader<'_>, cpu_count: u32) -> CaptureResult<Option<Self>> {
        Ok(match cpu_count {
            2 => Some(Self::Dual(CoreDump::parse(reader)?)),
            4 => Some(Self::Quad(CoreDump::parse(reader)?)),
            _ => None,
        })
    }

    /// Header.
    #[must_use]
    pub fn header(&self) -> FirmwareHeader {
        match self {
            Self::Dual(dump) => dump.header,
            Self::Quad(dump) => dump.header,
        }
    }

    /// Per-core status flags.
    #[must_use]
    pub fn sc_status(&self) -> &[u32] {
        match self {
            Self::Dual(dump) => &dump.sc_status,
            Self::Quad(dump) => &dump.sc_status,
        }
    }

    /// Per-core non-secure contexts.
    #[must_use]
    pub fn sc_ns(&self) -> &[CpuContext] {
        match self {
            Self::Dual(dump) => &dump.sc_ns,
            Self::Quad(dump) => &dump.sc_ns,
        }
    }

    /// Secure context.
    #[must_use]
    pub fn sec(&self) -> &MonitorContext {
        match self {
            Self::Dual(dump) => &dump.sec,
            Self::Quad(dump) => &dump.sec,
        }
    }

    /// Per-core watchdog status.
    #[must_use]
    pub fn wdt_sts(&self) -> &[u32] {
        match self {
            Self::Dual(dump) => &dump.wdt_sts,
            Self::Quad(dump) => &dump.wdt_sts,
        }
    }

    /// Whether any core left a watchdog status or monitor return address.
    #[must_use]
    pub fn has_activity(&self) -> bool {
        let sts = self.wdt_sts().iter().fold(0, |acc, sts| acc | sts);
        let lr = self.sc_ns().iter().fold(0, |acc, ctx| acc | ctx.saved.mon_lr);
        sts | lr != 0
    }
}

/// Kernel-side bookkeeping at the end of page one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelInfo {
    /// Task record size the kernel expects.
    pub tsk_size: u32,
    /// Offset of the task pointer in thread info.
    pub ti_tsk_offset: u32,
    /// Region size as seen by the secure side.
    pub size_tz: u32,
    /// Revision acknowledged by the secure side.
    pub rev_tz: u32,
    /// Region size stamped by the kernel.
    pub size: u32,
    /// Core count stamped by the kernel.
    pub cpu_count: u32,
    /// Overall copy status.
    pub ret: u32,
    /// Revision stamped by the kernel.
    pub rev: u32,
    /// Signature.
    pub sig: u32,
}

impl KernelInfo {
    /// Decode from page one.
    ///
    /// # Errors
    ///
    /// Returns an error if page one is incomplete.
    pub fn parse(reader: &RegionReader<'_>) -> CaptureResult<Self> {
        let [tsk_size, ti_tsk_offset, size_tz, rev_tz, size, cpu_count, ret, rev, sig] =
            reader.words::<9>(KERNEL_INFO_OFFSET)?;
        Ok(Self {
            tsk_size,
            ti_tsk_offset,
            size_tz,
            rev_tz,
            size,
            cpu_count,
            ret,
            rev,
            sig,
        })
    }
}

/// One copy performed by the secure side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyJob {
    /// Source address.
    pub from: u32,
    /// Destination address.
    pub to: u32,
    /// Bytes copied.
    pub size: u32,
}

impl fmt::Display for CopyJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x} -> {:08x} ({:x})", self.from, self.to, self.size)
    }
}

/// Per-core copy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerCoreRecord {
    /// Copy status for this core.
    pub ret: u32,
    /// Virtual base of the core's kernel stack.
    pub stack_va: u32,
    /// Stack copy.
    pub stack: CopyJob,
    /// Task copy.
    pub task: CopyJob,
}

impl PerCoreRecord {
    /// Decode the record at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record leaves the region.
    pub fn parse(reader: &RegionReader<'_>, offset: usize) -> CaptureResult<Self> {
        let [ret, stack_va, s_from, s_to, s_size, t_from, t_to, t_size] =
            reader.words::<8>(offset)?;
        Ok(Self {
            ret,
            stack_va,
            stack: CopyJob {
                from: s_from,
                to: s_to,
                size: s_size,
            },
            task: CopyJob {
                from: t_from,
                to: t_to,
                size: t_size,
            },
        })
    }
}

/// Task state letters indexed by lowest set state bit plus one.
const TASK_STATE_CHARS: &[u8] = b"RSDTtZXxKW";

/// One-line summary of the task that was running on a core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    /// Command name.
    pub comm: String,
    /// Raw state word.
    pub state: u32,
    /// Process id.
    pub pid: u32,
    /// Thread group id.
    pub tgid: u32,
    /// Thread info flags.
    pub flags: u32,
    /// Saved program counter of the switched-out context.
    pub saved_pc: u32,
}

impl TaskSummary {
    /// Decode from a task record and the matching thread info.
    ///
    /// # Errors
    ///
    /// Returns an error if a field leaves its record.
    pub fn parse(
        task: &RegionReader<'_>,
        fields: TaskFieldOffsets,
        thread_info: &RegionReader<'_>,
        ti: ThreadInfoOffsets,
    ) -> CaptureResult<Self> {
        let raw_comm = task.bytes(fields.comm as usize, 16)?;
        let end = raw_comm.iter().position(|b| *b == 0).unwrap_or(raw_comm.len());
        let comm = String::from_utf8_lossy(raw_comm.get(..end).unwrap_or_default()).into_owned();
        Ok(Self {
            comm,
            state: task.u32(fields.state as usize)?,
            pid: task.u32(fields.pid as usize)?,
            tgid: task.u32(fields.tgid as usize)?,
            flags: thread_info.u32(ti.flags as usize)?,
            saved_pc: thread_info.u32(ti.saved_pc as usize)?,
        })
    }

    /// Whether the task was runnable.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == 0
    }

    /// Single-letter state.
    #[must_use]
    pub fn state_char(&self) -> char {
        if self.state == 0 {
            return 'R';
        }
        let index = self.state.trailing_zeros() as usize + 1;
        TASK_STATE_CHARS.get(index).map_or('?', |c| char::from(*c))
    }
}

impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<15.15} {}", self.comm, self.state_char())?;
        if self.is_running() {
            f.write_str(" running  ")?;
        } else {
            write!(f, " {:08x} ", self.saved_pc)?;
        }
        write!(f, "pid {:6} tgid {:6} 0x{:08x}", self.pid, self.tgid, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_context_field_order() {
        let mut words = [0u32; MONITOR_CONTEXT_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u32::try_from(i).unwrap_or(u32::MAX);
        }
        let ctx = MonitorContext::from_words(words);
        assert_eq!(ctx.mon_lr, 0);
        assert_eq!(ctx.usr_r11, 13);
        assert_eq!(ctx.svc_r13, 21);
        assert_eq!(ctx.svc_r14, 22);
        assert_eq!(ctx.fiq_r14, 36);
    }

    #[test]
    fn test_secure_status_lines() {
        assert_eq!(
            SecureStatus(0).describe("CPU0"),
            ["CPU0: probably didn't finish dump."]
        );
        let lines = SecureStatus(SecureStatus::NON_SECURE | SecureStatus::WDT).describe("CPU1");
        assert_eq!(
            lines,
            [
                "CPU1: was in non-secure world.",
                "CPU1: experienced a watchdog timeout."
            ]
        );
        let lines = SecureStatus(SecureStatus::SGI | SecureStatus::WARM_BOOT).describe("CPU2");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.first().map(String::as_str), Some("CPU2: was in secure world."));
    }

    #[test]
    fn test_task_state_char() {
        let mut task = TaskSummary {
            comm: "kworker/0:1".into(),
            state: 0,
            pid: 42,
            tgid: 42,
            flags: 0x2,
            saved_pc: 0xc000_8000,
        };
        assert_eq!(task.state_char(), 'R');
        assert!(task.to_string().contains(" running  pid     42"));
        task.state = 1;
        assert_eq!(task.state_char(), 'S');
        task.state = 2;
        assert_eq!(task.state_char(), 'D');
        assert!(task.to_string().contains(" c0008000 "));
        task.state = 1 << 20;
        assert_eq!(task.state_char(), '?');
    }

    #[test]
    fn test_copy_job_display() {
        let job = CopyJob {
            from: 0xc0a0_0000,
            to: 0x8800_2000,
            size: 0x2000,
        };
        assert_eq!(job.to_string(), "c0a00000 -> 88002000 (2000)");
    }
}
