//! Watchdog configuration.
//!
//! Values come from platform configuration data (device tree, module
//! parameters) through an external loader, are validated once at attach
//! and are immutable afterwards.

use apwdog_timer::Ticks;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::CaptureLayout;
use crate::error::{WatchdogError, WatchdogResult};

/// Default timer clock in ticks per second.
pub const DEFAULT_CLOCK_HZ: u32 = 32_765;

/// Upper bound of the per-core liveness bitmap.
pub const MAX_CORES: u32 = 64;

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Master enable. When false the device refuses to attach.
    pub enabled: bool,
    /// Timer clock frequency (ticks per second).
    pub clock_hz: u32,
    /// Bark deadline measured from the last pet (milliseconds).
    pub bark_time_ms: u32,
    /// Interval between pets (milliseconds).
    pub pet_time_ms: u32,
    /// Ping every online core before each pet.
    pub ipi_ping: bool,
    /// Distance between bark and bite at attach time (seconds).
    pub bite_margin_secs: u32,
    /// Reboot delay after a kernel panic (seconds). Zero disarms the timer on panic.
    pub panic_timeout_secs: u32,
    /// Extra time granted on top of the panic timeout (seconds).
    pub panic_margin_secs: u32,
    /// Core whose task queue owns register access.
    pub designated_core: u32,
    /// Reserve, parse and re-arm the pre-bite context capture region.
    pub context_capture: bool,
    /// Shape of the capture region.
    pub capture_layout: CaptureLayout,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clock_hz: DEFAULT_CLOCK_HZ,
            bark_time_ms: 11_000,
            pet_time_ms: 10_000,
            ipi_ping: true,
            bite_margin_secs: 3,
            panic_timeout_secs: 0,
            panic_margin_secs: 4,
            designated_core: 0,
            context_capture: true,
            capture_layout: CaptureLayout::default(),
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any timing value is missing or inconsistent.
    pub fn validate(&self) -> WatchdogResult<()> {
        if self.clock_hz == 0 {
            return Err(WatchdogError::invalid_configuration(
                "clock_hz must be greater than 0",
            ));
        }
        if self.bark_time_ms == 0 {
            return Err(WatchdogError::invalid_configuration(
                "watchdog bark time not setup",
            ));
        }
        if self.pet_time_ms == 0 {
            return Err(WatchdogError::invalid_configuration(
                "watchdog pet time not setup",
            ));
        }
        if self.pet_time_ms >= self.bark_time_ms {
            return Err(WatchdogError::invalid_configuration(
                "pet_time_ms must be less than bark_time_ms",
            ));
        }
        if self.bite_margin_secs == 0 {
            return Err(WatchdogError::invalid_configuration(
                "bite_margin_secs must be greater than 0",
            ));
        }
        if self.designated_core >= MAX_CORES {
            return Err(WatchdogError::invalid_configuration(format!(
                "designated_core must be below {MAX_CORES}"
            )));
        }
        let bark = u64::from(self.bark_time_ms) * u64::from(self.clock_hz) / 1000;
        let bite = bark + u64::from(self.bite_margin_secs) * u64::from(self.clock_hz);
        if bite > u64::from(u32::MAX) {
            return Err(WatchdogError::invalid_configuration(
                "bite deadline does not fit the timer",
            ));
        }
        self.capture_layout.validate()
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }

    /// Bark deadline in ticks.
    #[must_use]
    pub fn bark_ticks(&self) -> Ticks {
        Ticks::from_millis(self.bark_time_ms, self.clock_hz)
    }

    /// Bite deadline in ticks as programmed at attach.
    #[must_use]
    pub fn bite_ticks(&self) -> Ticks {
        let margin = Ticks::from_secs(self.bite_margin_secs, self.clock_hz);
        Ticks(self.bark_ticks().get().saturating_add(margin.get()))
    }

    /// Deadline programmed into both registers when the kernel panics.
    #[must_use]
    pub fn panic_deadline_ticks(&self) -> Ticks {
        Ticks::from_secs(
            self.panic_timeout_secs
                .saturating_add(self.panic_margin_secs),
            self.clock_hz,
        )
    }

    /// Interval between pets.
    #[must_use]
    pub fn pet_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.pet_time_ms))
    }

    /// Wall-clock length of the bark deadline.
    #[must_use]
    pub fn bark_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.bark_time_ms))
    }
}

/// Builder for `WatchdogConfig`.
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Set the master enable.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the timer clock frequency.
    #[must_use]
    pub fn clock_hz(mut self, hz: u32) -> Self {
        self.config.clock_hz = hz;
        self
    }

    /// Set the bark time in milliseconds.
    #[must_use]
    pub fn bark_time_ms(mut self, ms: u32) -> Self {
        self.config.bark_time_ms = ms;
        self
    }

    /// Set the pet interval in milliseconds.
    #[must_use]
    pub fn pet_time_ms(mut self, ms: u32) -> Self {
        self.config.pet_time_ms = ms;
        self
    }

    /// Enable or disable the per-core liveness ping.
    #[must_use]
    pub fn ipi_ping(mut self, enabled: bool) -> Self {
        self.config.ipi_ping = enabled;
        self
    }

    /// Set the bark-to-bite margin in seconds.
    #[must_use]
    pub fn bite_margin_secs(mut self, secs: u32) -> Self {
        self.config.bite_margin_secs = secs;
        self
    }

    /// Set the panic reboot delay in seconds.
    #[must_use]
    pub fn panic_timeout_secs(mut self, secs: u32) -> Self {
        self.config.panic_timeout_secs = secs;
        self
    }

    /// Set the margin added to the panic reboot delay.
    #[must_use]
    pub fn panic_margin_secs(mut self, secs: u32) -> Self {
        self.config.panic_margin_secs = secs;
        self
    }

    /// Set the core that owns register access.
    #[must_use]
    pub fn designated_core(mut self, core: u32) -> Self {
        self.config.designated_core = core;
        self
    }

    /// Enable or disable context capture.
    #[must_use]
    pub fn context_capture(mut self, enabled: bool) -> Self {
        self.config.context_capture = enabled;
        self
    }

    /// Set the capture region layout.
    #[must_use]
    pub fn capture_layout(mut self, layout: CaptureLayout) -> Self {
        self.config.capture_layout = layout;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WatchdogConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert_eq!(config.clock_hz, 32_765);
    }

    #[test]
    fn test_derived_ticks() -> WatchdogResult<()> {
        let config = WatchdogConfig::builder()
            .clock_hz(10_000)
            .bark_time_ms(1_000)
            .pet_time_ms(500)
            .bite_margin_secs(2)
            .build()?;
        assert_eq!(config.bark_ticks(), Ticks(10_000));
        assert_eq!(config.bite_ticks(), Ticks(30_000));
        assert!(config.bark_ticks() < config.bite_ticks());
        assert_eq!(config.pet_interval(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn test_panic_deadline() {
        let config = WatchdogConfig {
            clock_hz: 100,
            panic_timeout_secs: 5,
            ..WatchdogConfig::default()
        };
        assert_eq!(config.panic_deadline_ticks(), Ticks(900));
    }

    #[test]
    fn test_validation_rejects_missing_times() {
        let config = WatchdogConfig {
            bark_time_ms: 0,
            ..WatchdogConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WatchdogConfig {
            pet_time_ms: 0,
            ..WatchdogConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WatchdogConfig {
            clock_hz: 0,
            ..WatchdogConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_pet_after_bark() {
        let result = WatchdogConfig::builder()
            .bark_time_ms(1_000)
            .pet_time_ms(1_000)
            .build();
        assert!(matches!(
            result,
            Err(WatchdogError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validation_rejects_overflowing_bite() {
        let result = WatchdogConfig::builder()
            .clock_hz(u32::MAX)
            .bark_time_ms(10_000)
            .pet_time_ms(1)
            .build();
        assert!(result.is_err());
    }
}
