//! # apwdog
//!
//! Supervision engine for the application-processor watchdog.
//!
//! The engine keeps a two-stage hardware timer from expiring while the
//! system is healthy and makes sure that, when it is not, the board resets
//! with enough state saved to tell what went wrong.
//!
//! ## Components
//!
//! - [`PetScheduler`]: recurring tick on a dedicated [`TaskQueue`] that
//!   runs a liveness round and pets the timer
//! - [`LivenessAggregator`]: pings every online core and waits for each to
//!   acknowledge, so a wedged core stalls the pet and lets the bark fire
//! - [`WatchdogDevice::escalate_bark`]: bark diagnostics, forced bite and
//!   the halt fallback
//! - [`PanicDeadlineReprogrammer`]: panic hook that disarms the timer or
//!   pushes both deadlines out
//! - [`Supervisor::disable`]: one-way, secure-side gated disable
//! - [`capture`]: replay and re-arm of the pre-bite context capture region
//!
//! ## Lifecycle
//!
//! ```text
//! attach ──► Running ──disable──► Disabled ──detach──► (gone)
//!              │ ▲
//!       suspend│ │resume
//!              ▼ │
//!            Suspended
//! ```
//!
//! ## Example
//!
//! ```rust
//! use apwdog::prelude::*;
//!
//! # fn main() -> Result<(), WatchdogError> {
//! let host = HostPlatform::inline(2);
//! let config = WatchdogConfig::builder()
//!     .clock_hz(32_765)
//!     .bark_time_ms(11_000)
//!     .pet_time_ms(10_000)
//!     .build()?;
//!
//! let supervisor = Supervisor::attach(config, host.platform())?;
//! assert!(supervisor.is_enabled());
//!
//! supervisor.disabled_store("1\n")?;
//! assert_eq!(supervisor.disabled_show(), "1\n");
//! supervisor.detach();
//! # Ok(())
//! # }
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bark;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod liveness;
pub mod panic;
pub mod platform;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod supervisor;

pub use bark::{BITE_FAILED, BarkEscalation, BarkReport, Timestamp};
pub use capture::{CaptureLayout, CaptureReport, CaptureVerdict};
pub use config::{WatchdogConfig, WatchdogConfigBuilder};
pub use device::{MAX_RESET_TIMEOUT_SECS, WatchdogDevice};
pub use error::{WatchdogError, WatchdogResult};
pub use liveness::{CoreId, CoreMask, LivenessAggregator, LivenessMask};
pub use panic::{
    PanicAction, PanicDeadlineReprogrammer, PanicHook, PanicNotifierChain, PanicRegistration,
};
pub use platform::{
    Clock, CoreMessenger, Platform, PowerUpReason, RegsaveMemory, RegsaveRegion, SecureMonitor,
    SystemControl,
};
pub use queue::{QueueContext, TaskQueue, TickOutcome};
pub use scheduler::{PetPhase, PetScheduler};
pub use stats::{SlackSnapshot, SlackStats};
pub use supervisor::Supervisor;
