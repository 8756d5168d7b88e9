//! Timer register map and the `RegisterBlock` seam.

use crate::error::{TimerError, TimerResult};

/// Bit position of the tick count inside `STS`.
pub const STATUS_COUNT_SHIFT: u32 = 1;

/// Width mask of the tick count inside `STS` (20 bits).
pub const STATUS_COUNT_MASK: u32 = 0x000F_FFFF;

/// Timer registers, named by their byte offset in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Register {
    /// Pet register. Writing 1 restarts the countdown.
    Reset = 0x04,
    /// Enable register.
    Enable = 0x08,
    /// Status register carrying the running tick count.
    Status = 0x0C,
    /// Bark deadline in ticks.
    BarkTime = 0x10,
    /// Bite deadline in ticks.
    BiteTime = 0x14,
}

impl Register {
    /// All registers in offset order.
    pub const ALL: [Register; 5] = [
        Register::Reset,
        Register::Enable,
        Register::Status,
        Register::BarkTime,
        Register::BiteTime,
    ];

    /// Byte offset from the block base.
    #[must_use]
    pub fn offset(self) -> usize {
        self as usize
    }

    /// Decode a byte offset.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::UnknownOffset`] if the offset is not in the map.
    pub fn from_offset(offset: usize) -> TimerResult<Self> {
        match offset {
            0x04 => Ok(Self::Reset),
            0x08 => Ok(Self::Enable),
            0x0C => Ok(Self::Status),
            0x10 => Ok(Self::BarkTime),
            0x14 => Ok(Self::BiteTime),
            other => Err(TimerError::UnknownOffset(other)),
        }
    }

    /// Dense index, used by fixed-size per-register tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Reset => 0,
            Self::Enable => 1,
            Self::Status => 2,
            Self::BarkTime => 3,
            Self::BiteTime => 4,
        }
    }

    /// Short register name as printed in diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "RST",
            Self::Enable => "CTL",
            Self::Status => "STS",
            Self::BarkTime => "BARK TIME",
            Self::BiteTime => "BITE TIME",
        }
    }
}

impl core::fmt::Display for Register {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A count of timer clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub u32);

impl Ticks {
    /// Ticks corresponding to `secs` seconds at `clock_hz`, saturating at `u32::MAX`.
    #[must_use]
    pub fn from_secs(secs: u32, clock_hz: u32) -> Self {
        Self(secs.saturating_mul(clock_hz))
    }

    /// Ticks corresponding to `ms` milliseconds at `clock_hz`, saturating.
    #[must_use]
    pub fn from_millis(ms: u32, clock_hz: u32) -> Self {
        let ticks = u64::from(ms) * u64::from(clock_hz) / 1000;
        Self(u32::try_from(ticks).unwrap_or(u32::MAX))
    }

    /// Raw register value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Ticks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// Raw access to the timer register block.
///
/// Implementations perform single 32-bit accesses with no caching. The
/// block is shared between the pet path, the bark interrupt and the panic
/// notifier, so every method takes `&self` and must be callable from any
/// of those contexts without locking.
pub trait RegisterBlock: Send + Sync {
    /// Read a register.
    fn read(&self, reg: Register) -> u32;

    /// Write a register.
    fn write(&self, reg: Register, value: u32);

    /// Make all previous writes visible to the timer.
    fn barrier(&self) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

impl<R: RegisterBlock + ?Sized> RegisterBlock for &R {
    fn read(&self, reg: Register) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        (**self).write(reg, value);
    }

    fn barrier(&self) {
        (**self).barrier();
    }
}

#[cfg(feature = "std")]
impl<R: RegisterBlock + ?Sized> RegisterBlock for std::sync::Arc<R> {
    fn read(&self, reg: Register) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        (**self).write(reg, value);
    }

    fn barrier(&self) {
        (**self).barrier();
    }
}

/// Raw values of the readable registers, captured for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSnapshot {
    /// `STS` register.
    pub status: u32,
    /// `EN` register.
    pub enable: u32,
    /// `BARK` register.
    pub bark_time: u32,
    /// `BITE` register.
    pub bite_time: u32,
}

impl RegisterSnapshot {
    /// Tick count encoded in the status word.
    #[must_use]
    pub fn count(&self) -> Ticks {
        decode_status_count(self.status)
    }
}

impl core::fmt::Display for RegisterSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "STS: {:#x}, CTL: {:#x}, BARK TIME: {:#x}, BITE TIME: {:#x}",
            self.status, self.enable, self.bark_time, self.bite_time
        )
    }
}

/// Extract the tick count from a raw `STS` value.
#[must_use]
pub fn decode_status_count(status: u32) -> Ticks {
    Ticks((status >> STATUS_COUNT_SHIFT) & STATUS_COUNT_MASK)
}

/// Build a raw `STS` value carrying `count` (enable bit clear).
#[must_use]
pub fn encode_status_count(count: u32) -> u32 {
    (count & STATUS_COUNT_MASK) << STATUS_COUNT_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_roundtrip() {
        for reg in Register::ALL {
            assert_eq!(Register::from_offset(reg.offset()), Ok(reg));
        }
        assert_eq!(
            Register::from_offset(0x00),
            Err(TimerError::UnknownOffset(0x00))
        );
    }

    #[test]
    fn test_status_decoding_ignores_enable_bit() {
        assert_eq!(decode_status_count(0x0000_0001), Ticks(0));
        assert_eq!(decode_status_count(encode_status_count(500) | 1), Ticks(500));
        assert_eq!(decode_status_count(0xFFFF_FFFF), Ticks(STATUS_COUNT_MASK));
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(Ticks::from_millis(11_000, 32_765), Ticks(360_415));
        assert_eq!(Ticks::from_secs(3, 32_765), Ticks(98_295));
        assert_eq!(Ticks::from_secs(u32::MAX, 2), Ticks(u32::MAX));
    }
}
