//! Error types for the watchdog supervision engine.
//!
//! Liveness and deadline violations are deliberately absent: they are
//! handled by the hardware bark, never surfaced as software errors.

use thiserror::Error;

/// Errors that can occur while attaching, driving or disabling the watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    /// Timing parameters are missing or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Watchdog is turned off by configuration; the device does not attach.
    #[error("Watchdog disabled by configuration")]
    DisabledByConfiguration,

    /// The timer register window could not be mapped.
    #[error("Cannot map watchdog registers: {0}")]
    RegisterMapping(String),

    /// A call into the secure monitor failed.
    #[error("Secure monitor call '{call}' failed with status {status}")]
    SecureCall {
        /// Name of the call.
        call: &'static str,
        /// Status returned by the monitor.
        status: i32,
    },

    /// User input to the disable control was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The hardware did not reset after a forced reset sequence.
    #[error("Watchdog reset has failed (timeout {timeout_secs}s)")]
    ResetFailed {
        /// Clamped timeout that was programmed.
        timeout_secs: u32,
    },

    /// The watchdog task queue is gone.
    #[error("Task queue unavailable: {0}")]
    TaskQueue(String),

    /// The context capture region could not be read.
    #[error("Context capture error: {0}")]
    Capture(#[from] crate::capture::CaptureError),
}

impl WatchdogError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create a register mapping error.
    #[must_use]
    pub fn register_mapping(reason: impl Into<String>) -> Self {
        Self::RegisterMapping(reason.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Create a task queue error.
    #[must_use]
    pub fn task_queue(reason: impl Into<String>) -> Self {
        Self::TaskQueue(reason.into())
    }

    /// Whether the failed operation left watchdog state untouched and may
    /// be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SecureCall { .. })
    }
}

/// A specialized `Result` type for watchdog operations.
pub type WatchdogResult<T> = std::result::Result<T, WatchdogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchdogError::SecureCall {
            call: "sec-wdog-disable",
            status: -5,
        };
        assert_eq!(
            err.to_string(),
            "Secure monitor call 'sec-wdog-disable' failed with status -5"
        );

        let err = WatchdogError::ResetFailed { timeout_secs: 60 };
        assert!(err.to_string().contains("60s"));
    }

    #[test]
    fn test_error_constructors() {
        let err = WatchdogError::invalid_configuration("bark time not set");
        assert!(matches!(err, WatchdogError::InvalidConfiguration(_)));

        let err = WatchdogError::invalid_input("only 1 is accepted");
        assert!(matches!(err, WatchdogError::InvalidInput(_)));
    }

    #[test]
    fn test_only_secure_call_is_transient() {
        assert!(
            WatchdogError::SecureCall {
                call: "x",
                status: 1
            }
            .is_transient()
        );
        assert!(!WatchdogError::DisabledByConfiguration.is_transient());
        assert!(!WatchdogError::ResetFailed { timeout_secs: 1 }.is_transient());
    }
}
