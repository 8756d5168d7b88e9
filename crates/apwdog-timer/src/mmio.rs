//! Memory-mapped register block.

#![expect(unsafe_code, reason = "volatile access to the mapped timer block")]

use crate::registers::{Register, RegisterBlock};
use core::ptr::NonNull;

/// Register block backed by a mapped MMIO window.
#[derive(Debug)]
pub struct MmioRegisters {
    base: NonNull<u8>,
}

// SAFETY: the window is device memory with no thread affinity, and every
// access is a single volatile 32-bit load or store.
unsafe impl Send for MmioRegisters {}
// SAFETY: as above; concurrent volatile accesses to distinct or identical
// timer registers are well defined for the device.
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Size of the register window in bytes.
    pub const WINDOW_SIZE: usize = 0x18;

    /// Wrap a mapped window.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapping of at least [`Self::WINDOW_SIZE`]
    /// bytes of the timer block, aligned to 4 bytes, that stays mapped for
    /// the lifetime of the returned value.
    #[must_use]
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    fn register_ptr(&self, reg: Register) -> *mut u32 {
        self.base.as_ptr().wrapping_add(reg.offset()).cast::<u32>()
    }
}

impl RegisterBlock for MmioRegisters {
    fn read(&self, reg: Register) -> u32 {
        // SAFETY: `new` guarantees the window covers every register offset
        // and is 4-byte aligned.
        unsafe { core::ptr::read_volatile(self.register_ptr(reg)) }
    }

    fn write(&self, reg: Register, value: u32) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile(self.register_ptr(reg), value) }
    }
}
