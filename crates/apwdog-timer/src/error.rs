//! Error types for timer register handling.
//!
//! Register reads and writes never fail; these errors only cover decoding
//! raw offsets and configuring the simulated block.

/// Errors raised while decoding or scripting timer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Offset does not name a timer register.
    UnknownOffset(usize),
    /// Status-read script has no room for more samples.
    ScriptFull {
        /// Number of samples the script can hold.
        capacity: usize,
    },
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownOffset(offset) => write!(f, "Unknown timer register offset {offset:#x}"),
            Self::ScriptFull { capacity } => {
                write!(f, "Status script is full ({capacity} samples)")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TimerError {}

/// A specialized `Result` type for timer register handling.
pub type TimerResult<T> = core::result::Result<T, TimerError>;

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::string::ToString;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TimerError::UnknownOffset(0x18).to_string(),
            "Unknown timer register offset 0x18"
        );
        assert_eq!(
            TimerError::ScriptFull { capacity: 16 }.to_string(),
            "Status script is full (16 samples)"
        );
    }
}
