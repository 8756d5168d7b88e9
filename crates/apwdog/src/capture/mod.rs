//! Context capture buffer.
//!
//! Before a bite the secure firmware saves every core's registers, the
//! running task and its kernel stack into a shared region. On the next
//! attach the region is inspected, reported and re-armed for the next
//! capture.

pub mod buffer;
pub mod format;
pub mod layout;
pub mod reader;
pub mod report;
pub mod unwind;

pub use buffer::{BarkDumpSetup, configure_bark_dump, inspect, restamp};
pub use format::{
    CopyJob, CoreDump, CpuContext, FirmwareDump, FirmwareHeader, KernelInfo, MonitorContext,
    PerCoreRecord, SecureStatus, TaskSummary,
};
pub use layout::{CaptureLayout, TaskFieldOffsets, ThreadInfoOffsets};
pub use reader::{CaptureError, CaptureResult, RegionReader, RegionWriter};
pub use report::{CaptureReport, CaptureVerdict, CoreTrace};
pub use unwind::{BacktraceEntry, RawDump, StackImage, Unwind};
