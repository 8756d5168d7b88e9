//! Wire layout of the context capture region.
//!
//! ```text
//! ┌──────────┐  firmware dump (magic, version, cpu_count, per-core state)
//! │  page 1  │  spare
//! │          │  kernel info (last 36 bytes)
//! ├──────────┤  per-core records
//! │  pages   │  task records
//! │          │  padding to a page
//! ├──────────┤  one THREAD_SIZE stack image per core
//! │  stacks  │
//! └──────────┘
//! ```
//!
//! All fields are little-endian 32-bit words.

use serde::{Deserialize, Serialize};

use crate::error::{WatchdogError, WatchdogResult};
use crate::platform::PAGE_SIZE;

/// Size of one kernel stack image.
pub const THREAD_SIZE: usize = 8192;

/// Firmware dump magic (`"QACD"` little-endian).
pub const TZ_DUMP_MAGIC: u32 = 0x4443_4151;

/// Firmware dump format version.
pub const TZ_DUMP_VERSION: u32 = 2;

/// Kernel info signature.
pub const CTX_SIGNATURE: u32 = 0x7764_7473;

/// Kernel info revision.
pub const CTX_REVISION: u32 = 0x0001_0003;

/// Completion marker: stage TZ, no error.
pub const CAPTURE_COMPLETE: u32 = 0xF0FF_0000;

/// Words in a monitor-mode register bank.
pub const MONITOR_CONTEXT_WORDS: usize = 37;

/// Words in a per-core context: bank plus `mon_sp` and `wdog_pc`.
pub const CPU_CONTEXT_WORDS: usize = MONITOR_CONTEXT_WORDS + 2;

/// Firmware header: magic, version, cpu count.
pub const FIRMWARE_HEADER_SIZE: usize = 12;

/// Size of the largest (four-core) firmware dump.
pub const FIRMWARE_AREA_SIZE: usize = firmware_dump_size(4);

/// Size of the kernel info block at the end of page one.
pub const KERNEL_INFO_SIZE: usize = 36;

/// Offset of the kernel info block.
pub const KERNEL_INFO_OFFSET: usize = PAGE_SIZE - KERNEL_INFO_SIZE;

/// Size of one per-core record.
pub const PER_CORE_RECORD_SIZE: usize = 32;

/// Bytes of thread info shown in a raw dump.
pub const THREAD_INFO_DUMP_SIZE: usize = 96;

/// Size of a firmware dump for `cores` cores.
#[must_use]
pub const fn firmware_dump_size(cores: usize) -> usize {
    FIRMWARE_HEADER_SIZE
        + cores * 4
        + cores * CPU_CONTEXT_WORDS * 4
        + MONITOR_CONTEXT_WORDS * 4
        + cores * 4
}

/// Offsets of task fields inside a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFieldOffsets {
    /// Scheduler state word.
    pub state: u32,
    /// Process id.
    pub pid: u32,
    /// Thread group id.
    pub tgid: u32,
    /// 16-byte command name.
    pub comm: u32,
}

impl Default for TaskFieldOffsets {
    fn default() -> Self {
        Self {
            state: 0x000,
            pid: 0x1e0,
            tgid: 0x1e4,
            comm: 0x2c4,
        }
    }
}

/// Offsets inside the thread info at the base of each stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadInfoOffsets {
    /// Flags word.
    pub flags: u32,
    /// Saved frame pointer of the switched-out context.
    pub saved_fp: u32,
    /// Saved stack pointer.
    pub saved_sp: u32,
    /// Saved program counter.
    pub saved_pc: u32,
}

impl Default for ThreadInfoOffsets {
    fn default() -> Self {
        Self {
            flags: 0,
            saved_fp: 56,
            saved_sp: 60,
            saved_pc: 64,
        }
    }
}

/// Shape of the capture region for this kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureLayout {
    /// Number of cores captured (2 or 4).
    pub cpu_count: u32,
    /// Size of one task record.
    pub task_record_size: u32,
    /// Offset of the task pointer inside thread info.
    pub ti_task_offset: u32,
    /// Task field offsets.
    pub task_fields: TaskFieldOffsets,
    /// Thread info offsets.
    pub thread_info: ThreadInfoOffsets,
}

impl Default for CaptureLayout {
    fn default() -> Self {
        Self {
            cpu_count: 4,
            task_record_size: 0x3c0,
            ti_task_offset: 12,
            task_fields: TaskFieldOffsets::default(),
            thread_info: ThreadInfoOffsets::default(),
        }
    }
}

impl CaptureLayout {
    /// Check the layout is one the firmware can fill.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::InvalidConfiguration`] on an unsupported
    /// core count or field offsets that fall outside their records.
    pub fn validate(&self) -> WatchdogResult<()> {
        if !matches!(self.cpu_count, 2 | 4) {
            return Err(WatchdogError::invalid_configuration(format!(
                "unsupported capture cpu_count {}",
                self.cpu_count
            )));
        }
        if self.task_record_size == 0 || self.task_record_size % 4 != 0 {
            return Err(WatchdogError::invalid_configuration(
                "task_record_size must be a non-zero multiple of 4",
            ));
        }
        let task = self.task_fields;
        let task_end = [task.state, task.pid, task.tgid]
            .into_iter()
            .map(|offset| offset.saturating_add(4))
            .chain([task.comm.saturating_add(16)])
            .max()
            .unwrap_or(0);
        if task_end > self.task_record_size {
            return Err(WatchdogError::invalid_configuration(
                "task field offsets exceed task_record_size",
            ));
        }
        let ti = self.thread_info;
        let ti_end = [ti.flags, ti.saved_fp, ti.saved_sp, ti.saved_pc, self.ti_task_offset]
            .into_iter()
            .map(|offset| offset.saturating_add(4))
            .max()
            .unwrap_or(0);
        if ti_end as usize > THREAD_INFO_DUMP_SIZE {
            return Err(WatchdogError::invalid_configuration(
                "thread info offsets exceed the thread info block",
            ));
        }
        Ok(())
    }

    /// Number of cores as an index bound.
    #[must_use]
    pub fn cores(&self) -> usize {
        self.cpu_count as usize
    }

    fn task_size(&self) -> usize {
        self.task_record_size as usize
    }

    /// Offset of the per-core status words.
    #[must_use]
    pub fn sc_status_offset(&self) -> usize {
        FIRMWARE_HEADER_SIZE
    }

    /// Offset of the non-secure per-core contexts.
    #[must_use]
    pub fn sc_ns_offset(&self) -> usize {
        self.sc_status_offset() + self.cores() * 4
    }

    /// Offset of the single secure context.
    #[must_use]
    pub fn sec_offset(&self) -> usize {
        self.sc_ns_offset() + self.cores() * CPU_CONTEXT_WORDS * 4
    }

    /// Offset of the per-core watchdog status words.
    #[must_use]
    pub fn wdt_sts_offset(&self) -> usize {
        self.sec_offset() + MONITOR_CONTEXT_WORDS * 4
    }

    /// Offset of per-core record `core`.
    #[must_use]
    pub fn per_core_offset(&self, core: usize) -> usize {
        PAGE_SIZE + core * PER_CORE_RECORD_SIZE
    }

    /// Offset of task record `core`.
    #[must_use]
    pub fn task_offset(&self, core: usize) -> usize {
        PAGE_SIZE + self.cores() * PER_CORE_RECORD_SIZE + core * self.task_size()
    }

    /// Offset of the first stack image.
    #[must_use]
    pub fn stacks_offset(&self) -> usize {
        let middle = self.cores() * (PER_CORE_RECORD_SIZE + self.task_size());
        PAGE_SIZE + middle.next_multiple_of(PAGE_SIZE)
    }

    /// Offset of stack image `core`.
    #[must_use]
    pub fn stack_offset(&self, core: usize) -> usize {
        self.stacks_offset() + core * THREAD_SIZE
    }

    /// Total size of the region.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.stacks_offset() + self.cores() * THREAD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_sizes() {
        assert_eq!(firmware_dump_size(2), 488);
        assert_eq!(FIRMWARE_AREA_SIZE, 816);
        assert!(FIRMWARE_AREA_SIZE + KERNEL_INFO_SIZE <= PAGE_SIZE);
    }

    #[test]
    fn test_quad_offsets() {
        let layout = CaptureLayout::default();
        assert_eq!(layout.sc_status_offset(), 12);
        assert_eq!(layout.sc_ns_offset(), 28);
        assert_eq!(layout.sec_offset(), 652);
        assert_eq!(layout.wdt_sts_offset(), 800);
        assert_eq!(KERNEL_INFO_OFFSET, 4060);
    }

    #[test]
    fn test_total_size() {
        let layout = CaptureLayout {
            cpu_count: 2,
            task_record_size: 1024,
            ..CaptureLayout::default()
        };
        // 2 * (32 + 1024) = 2112 -> one page
        assert_eq!(layout.stacks_offset(), 8192);
        assert_eq!(layout.total_size(), 8192 + 2 * 8192);
        assert_eq!(layout.task_offset(1), 4096 + 64 + 1024);
        assert_eq!(layout.stack_offset(1), 16_384);
    }

    #[test]
    fn test_validation() {
        assert!(CaptureLayout::default().validate().is_ok());
        let bad = CaptureLayout {
            cpu_count: 3,
            ..CaptureLayout::default()
        };
        assert!(bad.validate().is_err());
        let bad = CaptureLayout {
            task_record_size: 0x100,
            ..CaptureLayout::default()
        };
        assert!(bad.validate().is_err());
    }
}
