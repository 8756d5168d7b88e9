//! Frame-pointer backtrace over a captured stack image.
//!
//! Addresses stay in the virtual address space of the crashed kernel; every
//! read is translated into the image by subtracting the stack base.

use std::fmt;

use super::format::MonitorContext;
use super::layout::{THREAD_INFO_DUMP_SIZE, THREAD_SIZE, ThreadInfoOffsets};
use super::reader::{CaptureResult, RegionReader};

/// Deepest backtrace produced for one core.
pub const MAX_FRAMES: usize = 64;

/// Stack dump starts this many bytes below the stack pointer.
const STACK_DUMP_HEADROOM: u32 = 128;

const THREAD_MASK: u32 = (THREAD_SIZE as u32) - 1;

/// A run of words printed as a hex dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDump {
    /// What the words are.
    pub label: &'static str,
    /// Virtual address of the first word.
    pub address: u32,
    /// Dumped words.
    pub words: Vec<u32>,
}

impl fmt::Display for RawDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {:#x}: ", self.label, self.address)?;
        let mut address = self.address;
        for line in self.words.chunks(8) {
            write!(f, "{:04x} ", address & 0xffff)?;
            for word in line {
                write!(f, " {word:08x}")?;
            }
            writeln!(f)?;
            address = address.wrapping_add(32);
        }
        Ok(())
    }
}

/// One step of the backtrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktraceEntry {
    /// Program counter of the frame.
    pub pc: u32,
    /// Return address into the caller.
    pub caller: u32,
}

impl fmt::Display for BacktraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[<{:08x}>] from [<{:08x}>]", self.pc, self.caller)
    }
}

/// Result of unwinding one core's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwind {
    /// The recorded stack base is not a kernel stack address.
    InvalidStack(u32),
    /// The stack was walked.
    Walked {
        /// Thread info at the base of the stack.
        thread_info: RawDump,
        /// Live part of the stack.
        stack: RawDump,
        /// Frames, innermost first.
        frames: Vec<BacktraceEntry>,
    },
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStack(address) => {
                writeln!(f, "{address:08x} is not valid kernel address.")
            }
            Self::Walked {
                thread_info,
                stack,
                frames,
            } => {
                write!(f, "{thread_info}{stack}")?;
                for frame in frames {
                    writeln!(f, "{frame}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    fp: u32,
    sp: u32,
    pc: u32,
}

/// A captured kernel stack together with the address it lived at.
#[derive(Debug, Clone, Copy)]
pub struct StackImage<'a> {
    base: u32,
    image: RegionReader<'a>,
}

impl<'a> StackImage<'a> {
    /// Wrap a `THREAD_SIZE` image that lived at `base`.
    #[must_use]
    pub fn new(base: u32, image: RegionReader<'a>) -> Self {
        Self { base, image }
    }

    /// Whether `base` looks like a kernel stack.
    #[must_use]
    pub fn is_valid_base(base: u32) -> bool {
        base != 0 && base & THREAD_MASK == 0
    }

    fn offset_of(&self, va: u32) -> Option<usize> {
        let offset = va.checked_sub(self.base)? as usize;
        (offset < THREAD_SIZE).then_some(offset)
    }

    /// Word at virtual address `va`, if it lies inside the image.
    #[must_use]
    pub fn read(&self, va: u32) -> Option<u32> {
        let offset = self.offset_of(va)?;
        self.image.u32(offset).ok()
    }

    fn dump(&self, label: &'static str, offset: usize, len: usize) -> CaptureResult<RawDump> {
        let address = self
            .base
            .wrapping_add(u32::try_from(offset).unwrap_or(u32::MAX));
        Ok(RawDump {
            label,
            address,
            words: self.image.word_vec(offset, len)?,
        })
    }
}

/// Walk the stack of one core.
///
/// When the saved supervisor stack pointer lies in this stack, the walk
/// starts from the live registers; otherwise it starts from the context
/// saved in thread info at the last switch.
///
/// # Errors
///
/// Returns an error if the image is shorter than `THREAD_SIZE`.
pub fn unwind(
    regs: &MonitorContext,
    stack: StackImage<'_>,
    ti: ThreadInfoOffsets,
) -> CaptureResult<Unwind> {
    if !StackImage::is_valid_base(stack.base) {
        return Ok(Unwind::InvalidStack(stack.base));
    }

    let start = if regs.svc_r13 & !THREAD_MASK == stack.base {
        Frame {
            fp: stack.base | (regs.usr_r11 & THREAD_MASK),
            sp: stack.base | (regs.svc_r13 & THREAD_MASK),
            pc: regs.mon_lr,
        }
    } else {
        Frame {
            fp: stack.image.u32(ti.saved_fp as usize)?,
            sp: stack.image.u32(ti.saved_sp as usize)?,
            pc: stack.image.u32(ti.saved_pc as usize)?,
        }
    };

    let sp_offset = stack.offset_of(start.sp).unwrap_or(0);
    let headroom = STACK_DUMP_HEADROOM as usize;
    let dump_offset = sp_offset.saturating_sub(headroom) & !(headroom - 1);

    let thread_info = stack.dump("thread_info", 0, THREAD_INFO_DUMP_SIZE)?;
    let dump = stack.dump("stack", dump_offset, THREAD_SIZE - dump_offset)?;
    let frames = walk(&stack, start);

    Ok(Unwind::Walked {
        thread_info,
        stack: dump,
        frames,
    })
}

fn walk(stack: &StackImage<'_>, mut frame: Frame) -> Vec<BacktraceEntry> {
    let mut frames = Vec::new();
    while frames.len() < MAX_FRAMES {
        let low = u64::from(frame.sp);
        let high = low.next_multiple_of(THREAD_SIZE as u64);
        let fp = u64::from(frame.fp);
        if fp < low + 12 || fp + 4 > high {
            break;
        }
        let (Some(fp), Some(sp), Some(pc)) = (
            stack.read(frame.fp.wrapping_sub(12)),
            stack.read(frame.fp.wrapping_sub(8)),
            stack.read(frame.fp.wrapping_sub(4)),
        ) else {
            break;
        };
        frames.push(BacktraceEntry {
            pc: frame.pc,
            caller: pc,
        });
        frame = Frame { fp, sp, pc };
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const BASE: u32 = 0xc0a0_0000;

    fn put(image: &mut [u8], va: u32, value: u32) {
        let offset = (va - BASE) as usize;
        if let Some(word) = image.get_mut(offset..offset + 4) {
            word.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Two nested frames below `BASE + 0x1f00`.
    fn chained_image() -> Vec<u8> {
        let mut image = vec![0u8; THREAD_SIZE];
        // frame 1 at fp 0x1e0c: caller fp 0x1f0c, caller sp 0x1e10, return pc
        put(&mut image, BASE + 0x1e00, BASE + 0x1f0c);
        put(&mut image, BASE + 0x1e04, BASE + 0x1e10);
        put(&mut image, BASE + 0x1e08, 0xc010_2000);
        // frame 2 at fp 0x1f0c: terminating fp 0
        put(&mut image, BASE + 0x1f00, 0);
        put(&mut image, BASE + 0x1f04, BASE + 0x1f10);
        put(&mut image, BASE + 0x1f08, 0xc010_3000);
        image
    }

    #[test]
    fn test_invalid_base() -> CaptureResult<()> {
        let image = vec![0u8; THREAD_SIZE];
        let stack = StackImage::new(0xc0a0_0100, RegionReader::new(&image));
        let result = unwind(&MonitorContext::default(), stack, ThreadInfoOffsets::default())?;
        assert_eq!(result, Unwind::InvalidStack(0xc0a0_0100));
        assert_eq!(result.to_string(), "c0a00100 is not valid kernel address.\n");
        Ok(())
    }

    #[test]
    fn test_walk_from_live_registers() -> TestResult {
        let image = chained_image();
        let regs = MonitorContext {
            mon_lr: 0xc010_1000,
            svc_r13: BASE + 0x1d00,
            usr_r11: 0x0000_1e0c,
            ..MonitorContext::default()
        };
        let stack = StackImage::new(BASE, RegionReader::new(&image));
        let Unwind::Walked { frames, stack, .. } =
            unwind(&regs, stack, ThreadInfoOffsets::default())?
        else {
            return Err("expected a walked stack".into());
        };
        assert_eq!(
            frames,
            [
                BacktraceEntry {
                    pc: 0xc010_1000,
                    caller: 0xc010_2000
                },
                BacktraceEntry {
                    pc: 0xc010_2000,
                    caller: 0xc010_3000
                },
            ]
        );
        assert_eq!(stack.address, BASE + 0x1c80);
        assert_eq!(stack.words.len(), (THREAD_SIZE - 0x1c80) / 4);
        Ok(())
    }

    #[test]
    fn test_walk_from_saved_context() -> TestResult {
        let mut image = chained_image();
        let ti = ThreadInfoOffsets::default();
        put(&mut image, BASE + ti.saved_fp, BASE + 0x1f0c);
        put(&mut image, BASE + ti.saved_sp, BASE + 0x1e80);
        put(&mut image, BASE + ti.saved_pc, 0xc020_0000);

        let stack = StackImage::new(BASE, RegionReader::new(&image));
        let regs = MonitorContext {
            svc_r13: 0xc0b0_0000,
            ..MonitorContext::default()
        };
        let Unwind::Walked { frames, .. } = unwind(&regs, stack, ti)? else {
            return Err("expected a walked stack".into());
        };
        assert_eq!(
            frames,
            [BacktraceEntry {
                pc: 0xc020_0000,
                caller: 0xc010_3000
            }]
        );
        Ok(())
    }

    #[test]
    fn test_walk_stops_on_self_loop() {
        let mut image = vec![0u8; THREAD_SIZE];
        put(&mut image, BASE + 0x100, BASE + 0x10c);
        put(&mut image, BASE + 0x104, BASE + 0x100);
        put(&mut image, BASE + 0x108, 0xc000_0000);
        let stack = StackImage::new(BASE, RegionReader::new(&image));
        let frames = walk(
            &stack,
            Frame {
                fp: BASE + 0x10c,
                sp: BASE + 0x100,
                pc: 1,
            },
        );
        assert_eq!(frames.len(), MAX_FRAMES);
    }

    #[test]
    fn test_raw_dump_lines() {
        let dump = RawDump {
            label: "thread_info",
            address: 0xc0a0_0000,
            words: (0..16).collect(),
        };
        let text = dump.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.first().copied(), Some("thread_info: 0xc0a00000: "));
        assert_eq!(
            lines.get(2).copied(),
            Some("0020  00000008 00000009 0000000a 0000000b 0000000c 0000000d 0000000e 0000000f")
        );
    }
}
