//! Common imports.

pub use crate::bark::{BarkEscalation, BarkReport};
pub use crate::capture::{CaptureLayout, CaptureReport, CaptureVerdict};
pub use crate::config::WatchdogConfig;
pub use crate::error::{WatchdogError, WatchdogResult};
pub use crate::host::HostPlatform;
pub use crate::liveness::{CoreId, CoreMask};
pub use crate::platform::{Platform, PowerUpReason};
pub use crate::stats::SlackSnapshot;
pub use crate::supervisor::Supervisor;

pub use apwdog_timer::{Register, RegisterBlock, Ticks, WatchdogTimer};
