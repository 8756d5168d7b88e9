//! Multi-core liveness aggregation.
//!
//! A round clears the shared [`LivenessMask`], sends a synchronous request
//! to every online core and waits for each core to set its own bit. A
//! wedged core never answers, so the round never finishes and the pet that
//! follows it never happens. The hardware bark deadline is the only
//! timeout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crate::platform::CoreMessenger;

/// Processor core index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreId(pub u32);

impl CoreId {
    /// Raw core index.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU{}", self.0)
    }
}

/// A set of up to 64 cores.
///
/// `Display` renders a CPU list such as `0-1,3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CoreMask(u64);

impl CoreMask {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Cores `0..count`.
    #[must_use]
    pub fn first(count: u32) -> Self {
        if count >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << count) - 1)
        }
    }

    /// Build from a raw bitmap.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bitmap.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Add a core. Cores beyond 63 are ignored.
    pub fn insert(&mut self, core: CoreId) {
        if let Some(bit) = bit(core) {
            self.0 |= bit;
        }
    }

    /// Remove a core.
    pub fn remove(&mut self, core: CoreId) {
        if let Some(bit) = bit(core) {
            self.0 &= !bit;
        }
    }

    /// Whether `core` is in the set.
    #[must_use]
    pub fn contains(self, core: CoreId) -> bool {
        bit(core).is_some_and(|bit| self.0 & bit != 0)
    }

    /// Whether every core of `other` is in the set.
    #[must_use]
    pub fn is_superset(self, other: CoreMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of cores in the set.
    #[must_use]
    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Cores in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CoreId> {
        (0..64u32)
            .filter(move |index| self.0 & (1u64 << index) != 0)
            .map(CoreId)
    }
}

fn bit(core: CoreId) -> Option<u64> {
    1u64.checked_shl(core.0)
}

impl FromIterator<CoreId> for CoreMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for core in iter {
            mask.insert(core);
        }
        mask
    }
}

impl fmt::Display for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut index = 0u32;
        while index < 64 {
            if self.0 & (1u64 << index) == 0 {
                index += 1;
                continue;
            }
            let start = index;
            while index + 1 < 64 && self.0 & (1u64 << (index + 1)) != 0 {
                index += 1;
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == index {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{index}")?;
            }
            index += 1;
        }
        Ok(())
    }
}

/// Shared bitmap of cores that acknowledged the current round.
///
/// Written from the acknowledging cores, cleared by the aggregator.
#[derive(Debug, Default)]
pub struct LivenessMask {
    bits: AtomicU64,
}

impl LivenessMask {
    /// Create an empty mask.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `core` alive. Called on the acknowledging core.
    pub fn acknowledge(&self, core: CoreId) {
        if let Some(bit) = bit(core) {
            self.bits.fetch_or(bit, Ordering::SeqCst);
        }
    }

    /// Forget every acknowledgement.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::SeqCst);
    }

    /// Cores that have acknowledged so far.
    #[must_use]
    pub fn snapshot(&self) -> CoreMask {
        CoreMask(self.bits.load(Ordering::SeqCst))
    }
}

/// Broadcast-and-wait liveness protocol.
pub struct LivenessAggregator {
    alive: Arc<LivenessMask>,
    expected: AtomicU64,
    cores: Arc<dyn CoreMessenger>,
}

impl LivenessAggregator {
    /// Create an aggregator pinging through `cores`.
    pub fn new(cores: Arc<dyn CoreMessenger>) -> Self {
        Self {
            alive: Arc::new(LivenessMask::new()),
            expected: AtomicU64::new(0),
            cores,
        }
    }

    /// Clear the liveness set and expect every currently online core.
    pub fn begin_round(&self) {
        self.alive.clear();
        self.expected
            .store(self.cores.online_cores().bits(), Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Ping every online core and block until each has acknowledged.
    ///
    /// Never returns while a core is unresponsive.
    pub fn broadcast_ping(&self) {
        let online = self.cores.online_cores();
        self.expected.store(online.bits(), Ordering::SeqCst);
        for core in online.iter() {
            self.cores.ping(core, &self.alive);
        }
    }

    /// Whether every expected core has acknowledged this round.
    #[must_use]
    pub fn is_round_complete(&self) -> bool {
        let expected = CoreMask(self.expected.load(Ordering::SeqCst));
        self.alive.snapshot().is_superset(expected)
    }

    /// Full round: begin, broadcast and wait. Returns the cores that answered.
    pub fn run_round(&self) -> CoreMask {
        self.begin_round();
        self.broadcast_ping();
        self.alive.snapshot()
    }

    /// Cores that acknowledged the latest round so far.
    #[must_use]
    pub fn snapshot(&self) -> CoreMask {
        self.alive.snapshot()
    }

    /// Cores the latest round waits for.
    #[must_use]
    pub fn expected(&self) -> CoreMask {
        CoreMask(self.expected.load(Ordering::SeqCst))
    }
}

impl fmt::Debug for LivenessAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessAggregator")
            .field("alive", &self.alive.snapshot())
            .field("expected", &self.expected())
            .finish_non_exhaustive()
    }
}
