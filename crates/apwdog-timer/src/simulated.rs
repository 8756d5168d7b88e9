//! Simulated register block.
//!
//! `SimulatedRegisters` stands in for the memory-mapped timer on hosts
//! without one. It keeps register values, counts accesses, journals the
//! first writes in order and can replay a script of status-counter samples
//! to exercise the debounced read.

use crate::error::{TimerError, TimerResult};
use crate::registers::{Register, RegisterBlock, encode_status_count};
use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Number of status samples a script can hold.
pub const SCRIPT_CAPACITY: usize = 16;

/// Number of writes kept in the journal.
pub const JOURNAL_CAPACITY: usize = 64;

/// Software register block with access accounting.
///
/// # Behaviour
///
/// - Writing 1 to `RST` clears the tick count, like the hardware restart.
/// - Reads of `STS` consume scripted samples first, then fall back to the
///   stored count.
/// - The block never resets the host: a forced bite is only recorded.
///
/// # Example
///
/// ```rust
/// use apwdog_timer::{Register, RegisterBlock, SimulatedRegisters};
///
/// let regs = SimulatedRegisters::new();
/// regs.set_count(42);
/// regs.write(Register::Reset, 1);
///
/// assert_eq!(regs.pet_count(), 1);
/// assert_eq!(regs.count(), 0);
/// ```
#[derive(Debug)]
pub struct SimulatedRegisters {
    values: [AtomicU32; 5],
    writes: [AtomicU64; 5],
    status_reads: AtomicU64,
    pets: AtomicU64,
    barriers: AtomicU64,
    unfenced: AtomicBool,
    script: [AtomicU32; SCRIPT_CAPACITY],
    script_len: AtomicUsize,
    script_cursor: AtomicUsize,
    journal: [AtomicU64; JOURNAL_CAPACITY],
    journal_len: AtomicUsize,
}

impl SimulatedRegisters {
    /// Create a block with every register cleared.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: core::array::from_fn(|_| AtomicU32::new(0)),
            writes: core::array::from_fn(|_| AtomicU64::new(0)),
            status_reads: AtomicU64::new(0),
            pets: AtomicU64::new(0),
            barriers: AtomicU64::new(0),
            unfenced: AtomicBool::new(false),
            script: core::array::from_fn(|_| AtomicU32::new(0)),
            script_len: AtomicUsize::new(0),
            script_cursor: AtomicUsize::new(0),
            journal: core::array::from_fn(|_| AtomicU64::new(0)),
            journal_len: AtomicUsize::new(0),
        }
    }

    /// Set the running tick count seen by un-scripted status reads.
    pub fn set_count(&self, count: u32) {
        let enable = per_register(&self.values, Register::Enable).load(Ordering::Acquire) & 1;
        per_register(&self.values, Register::Status)
            .store(encode_status_count(count) | enable, Ordering::Release);
    }

    /// Current tick count (un-scripted).
    #[must_use]
    pub fn count(&self) -> u32 {
        crate::registers::decode_status_count(
            per_register(&self.values, Register::Status).load(Ordering::Acquire),
        )
        .get()
    }

    /// Queue tick counts to be returned by the next status reads.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ScriptFull`] if the samples do not fit.
    pub fn script_counts(&self, counts: &[u32]) -> TimerResult<()> {
        let mut start = self.script_len.load(Ordering::Acquire);
        if self.script_cursor.load(Ordering::Acquire) >= start {
            self.script_cursor.store(0, Ordering::Release);
            start = 0;
        }
        if start + counts.len() > SCRIPT_CAPACITY {
            return Err(TimerError::ScriptFull {
                capacity: SCRIPT_CAPACITY,
            });
        }
        for (slot, count) in self.script.iter().skip(start).zip(counts) {
            slot.store(encode_status_count(*count), Ordering::Release);
        }
        self.script_len
            .store(start + counts.len(), Ordering::Release);
        Ok(())
    }

    /// Number of pets (writes of 1 to `RST`).
    #[must_use]
    pub fn pet_count(&self) -> u64 {
        self.pets.load(Ordering::Acquire)
    }

    /// Number of writes to `reg`.
    #[must_use]
    pub fn write_count(&self, reg: Register) -> u64 {
        per_register(&self.writes, reg).load(Ordering::Acquire)
    }

    /// Total writes across all registers.
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.writes.iter().map(|w| w.load(Ordering::Acquire)).sum()
    }

    /// Number of status register reads.
    #[must_use]
    pub fn status_reads(&self) -> u64 {
        self.status_reads.load(Ordering::Acquire)
    }

    /// Number of barriers issued.
    #[must_use]
    pub fn barrier_count(&self) -> u64 {
        self.barriers.load(Ordering::Acquire)
    }

    /// Whether a write happened after the last barrier.
    #[must_use]
    pub fn has_unfenced_writes(&self) -> bool {
        self.unfenced.load(Ordering::Acquire)
    }

    /// Current raw value of `reg`.
    #[must_use]
    pub fn value(&self, reg: Register) -> u32 {
        per_register(&self.values, reg).load(Ordering::Acquire)
    }

    /// The first [`JOURNAL_CAPACITY`] writes, in order.
    pub fn journal(&self) -> impl Iterator<Item = (Register, u32)> + '_ {
        let len = self.journal_len.load(Ordering::Acquire).min(JOURNAL_CAPACITY);
        self.journal.iter().take(len).filter_map(|entry| {
            let raw = entry.load(Ordering::Acquire);
            let offset = usize::try_from(raw >> 32).ok()?;
            let reg = Register::from_offset(offset).ok()?;
            #[expect(clippy::cast_possible_truncation, reason = "low half holds the value")]
            let value = raw as u32;
            Some((reg, value))
        })
    }

    /// Forget all accounting, keeping register values.
    pub fn clear_accounting(&self) {
        for w in &self.writes {
            w.store(0, Ordering::Release);
        }
        self.status_reads.store(0, Ordering::Release);
        self.pets.store(0, Ordering::Release);
        self.barriers.store(0, Ordering::Release);
        self.journal_len.store(0, Ordering::Release);
    }

    fn record(&self, reg: Register, value: u32) {
        let slot = self.journal_len.fetch_add(1, Ordering::AcqRel);
        if let Some(entry) = self.journal.get(slot) {
            entry.store(
                ((reg.offset() as u64) << 32) | u64::from(value),
                Ordering::Release,
            );
        }
    }
}

fn per_register<T>(table: &[T; 5], reg: Register) -> &T {
    let [reset, enable, status, bark, bite] = table;
    match reg {
        Register::Reset => reset,
        Register::Enable => enable,
        Register::Status => status,
        Register::BarkTime => bark,
        Register::BiteTime => bite,
    }
}

impl Default for SimulatedRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBlock for SimulatedRegisters {
    fn read(&self, reg: Register) -> u32 {
        if reg != Register::Status {
            return self.value(reg);
        }
        self.status_reads.fetch_add(1, Ordering::Relaxed);
        let cursor = self.script_cursor.load(Ordering::Acquire);
        if cursor < self.script_len.load(Ordering::Acquire) {
            self.script_cursor.store(cursor + 1, Ordering::Release);
            if let Some(sample) = self.script.get(cursor) {
                return sample.load(Ordering::Acquire);
            }
        }
        self.value(Register::Status)
    }

    fn write(&self, reg: Register, value: u32) {
        per_register(&self.values, reg).store(value, Ordering::Release);
        per_register(&self.writes, reg).fetch_add(1, Ordering::Relaxed);
        self.unfenced.store(true, Ordering::Release);
        self.record(reg, value);
        match reg {
            Register::Reset if value == 1 => {
                self.pets.fetch_add(1, Ordering::Relaxed);
                self.set_count(0);
            }
            Register::Enable => {
                let status = per_register(&self.values, Register::Status).load(Ordering::Acquire);
                per_register(&self.values, Register::Status)
                    .store((status & !1) | (value & 1), Ordering::Release);
            }
            _ => {}
        }
    }

    fn barrier(&self) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        self.barriers.fetch_add(1, Ordering::Relaxed);
        self.unfenced.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    #[test]
    fn test_new_block_is_cleared() {
        let regs = SimulatedRegisters::new();
        for reg in Register::ALL {
            assert_eq!(regs.read(reg), 0);
        }
        assert_eq!(regs.total_writes(), 0);
    }

    #[test]
    fn test_pet_clears_count() {
        let regs = SimulatedRegisters::new();
        regs.set_count(1234);
        assert_eq!(regs.count(), 1234);
        regs.write(Register::Reset, 1);
        assert_eq!(regs.count(), 0);
        assert_eq!(regs.pet_count(), 1);
    }

    #[test]
    fn test_writing_zero_to_reset_is_not_a_pet() {
        let regs = SimulatedRegisters::new();
        regs.write(Register::Reset, 0);
        assert_eq!(regs.pet_count(), 0);
        assert_eq!(regs.write_count(Register::Reset), 1);
    }

    #[test]
    fn test_script_precedes_stored_count() -> TimerResult<()> {
        let regs = SimulatedRegisters::new();
        regs.set_count(7);
        regs.script_counts(&[1, 2])?;
        let counts: Vec<u32> = (0..3)
            .map(|_| crate::registers::decode_status_count(regs.read(Register::Status)).get())
            .collect();
        assert_eq!(counts, [1, 2, 7]);
        Ok(())
    }

    #[test]
    fn test_script_overflow() {
        let regs = SimulatedRegisters::new();
        let result = regs.script_counts(&[0; SCRIPT_CAPACITY + 1]);
        assert_eq!(
            result,
            Err(TimerError::ScriptFull {
                capacity: SCRIPT_CAPACITY
            })
        );
    }

    #[test]
    fn test_journal_preserves_order() {
        let regs = SimulatedRegisters::new();
        regs.write(Register::BarkTime, 10);
        regs.write(Register::BiteTime, 20);
        regs.write(Register::Enable, 1);
        let journal: Vec<_> = regs.journal().collect();
        assert_eq!(
            journal,
            [
                (Register::BarkTime, 10),
                (Register::BiteTime, 20),
                (Register::Enable, 1)
            ]
        );
    }
}
