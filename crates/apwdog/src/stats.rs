//! Pet slack statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Running slack statistics, updated lock-free by the pet path.
///
/// Minima only ever decrease until [`SlackStats::reset`].
#[derive(Debug)]
pub struct SlackStats {
    pets: AtomicU64,
    last_slack_ticks: AtomicI64,
    last_slack_ns: AtomicI64,
    min_slack_ticks: AtomicI64,
    min_slack_ns: AtomicI64,
}

impl SlackStats {
    /// Create empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pets: AtomicU64::new(0),
            last_slack_ticks: AtomicI64::new(0),
            last_slack_ns: AtomicI64::new(0),
            min_slack_ticks: AtomicI64::new(i64::MAX),
            min_slack_ns: AtomicI64::new(i64::MAX),
        }
    }

    /// Record one pet.
    pub fn record(&self, slack_ticks: i64, slack_ns: i64) {
        self.last_slack_ticks.store(slack_ticks, Ordering::Relaxed);
        self.last_slack_ns.store(slack_ns, Ordering::Relaxed);
        self.min_slack_ticks.fetch_min(slack_ticks, Ordering::AcqRel);
        self.min_slack_ns.fetch_min(slack_ns, Ordering::AcqRel);
        self.pets.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.pets.store(0, Ordering::Release);
        self.last_slack_ticks.store(0, Ordering::Release);
        self.last_slack_ns.store(0, Ordering::Release);
        self.min_slack_ticks.store(i64::MAX, Ordering::Release);
        self.min_slack_ns.store(i64::MAX, Ordering::Release);
    }

    /// Smallest tick slack seen, if any pet happened.
    #[must_use]
    pub fn min_slack_ticks(&self) -> Option<i64> {
        unset_to_none(self.min_slack_ticks.load(Ordering::Acquire))
    }

    /// Smallest wall-clock slack seen in nanoseconds.
    #[must_use]
    pub fn min_slack_ns(&self) -> Option<i64> {
        unset_to_none(self.min_slack_ns.load(Ordering::Acquire))
    }

    /// Number of pets recorded.
    #[must_use]
    pub fn pet_count(&self) -> u64 {
        self.pets.load(Ordering::Acquire)
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> SlackSnapshot {
        let pets = self.pet_count();
        SlackSnapshot {
            pet_count: pets,
            last_slack_ticks: (pets > 0).then(|| self.last_slack_ticks.load(Ordering::Acquire)),
            last_slack_ns: (pets > 0).then(|| self.last_slack_ns.load(Ordering::Acquire)),
            min_slack_ticks: self.min_slack_ticks(),
            min_slack_ns: self.min_slack_ns(),
        }
    }
}

impl Default for SlackStats {
    fn default() -> Self {
        Self::new()
    }
}

fn unset_to_none(value: i64) -> Option<i64> {
    (value != i64::MAX).then_some(value)
}

/// Point-in-time copy of [`SlackStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlackSnapshot {
    /// Number of pets.
    pub pet_count: u64,
    /// Tick slack at the latest pet.
    pub last_slack_ticks: Option<i64>,
    /// Wall-clock slack at the latest pet (ns).
    pub last_slack_ns: Option<i64>,
    /// Smallest tick slack seen.
    pub min_slack_ticks: Option<i64>,
    /// Smallest wall-clock slack seen (ns).
    pub min_slack_ns: Option<i64>,
}
