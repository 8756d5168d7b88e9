//! Bounds-checked word access to the capture region.

use thiserror::Error;

/// Errors raised while reading the capture region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// A read or write fell outside the region.
    #[error("Access of {len} bytes at {offset:#x} outside region of {size:#x} bytes")]
    OutOfBounds {
        /// Byte offset.
        offset: usize,
        /// Access length.
        len: usize,
        /// Region size.
        size: usize,
    },
}

/// Result alias for region access.
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Read-only view of the region.
#[derive(Debug, Clone, Copy)]
pub struct RegionReader<'a> {
    bytes: &'a [u8],
}

impl<'a> RegionReader<'a> {
    /// Wrap `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Region size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if the range leaves the region.
    pub fn bytes(&self, offset: usize, len: usize) -> CaptureResult<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(CaptureError::OutOfBounds {
                offset,
                len,
                size: self.bytes.len(),
            })
    }

    /// Little-endian word at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if the word leaves the region.
    pub fn u32(&self, offset: usize) -> CaptureResult<u32> {
        let raw = self.bytes(offset, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(raw);
        Ok(u32::from_le_bytes(word))
    }

    /// `N` consecutive words starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if any word leaves the region.
    pub fn words<const N: usize>(&self, offset: usize) -> CaptureResult<[u32; N]> {
        let raw = self.bytes(offset, N * 4)?;
        let mut words = [0u32; N];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(chunk);
            *word = u32::from_le_bytes(bytes);
        }
        Ok(words)
    }

    /// Words in `[offset, offset + len)` as a vector.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if the range leaves the region.
    pub fn word_vec(&self, offset: usize, len: usize) -> CaptureResult<Vec<u32>> {
        let raw = self.bytes(offset, len)?;
        Ok(raw
            .chunks_exact(4)
            .map(|chunk| {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(chunk);
                u32::from_le_bytes(bytes)
            })
            .collect())
    }

    /// Sub-view of `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if the range leaves the region.
    pub fn view(&self, offset: usize, len: usize) -> CaptureResult<RegionReader<'a>> {
        self.bytes(offset, len).map(RegionReader::new)
    }
}

/// Mutable view used to stamp a fresh header.
#[derive(Debug)]
pub struct RegionWriter<'a> {
    bytes: &'a mut [u8],
}

impl<'a> RegionWriter<'a> {
    /// Wrap `bytes`.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Zero the whole region.
    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }

    /// Store a little-endian word at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfBounds`] if the word leaves the region.
    pub fn put_u32(&mut self, offset: usize, value: u32) -> CaptureResult<()> {
        let size = self.bytes.len();
        let slot = offset
            .checked_add(4)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(CaptureError::OutOfBounds {
                offset,
                len: 4,
                size,
            })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_little_endian() -> CaptureResult<()> {
        let bytes = [0x51, 0x41, 0x43, 0x44, 2, 0, 0, 0];
        let reader = RegionReader::new(&bytes);
        assert_eq!(reader.u32(0)?, 0x4443_4151);
        assert_eq!(reader.words::<2>(0)?, [0x4443_4151, 2]);
        Ok(())
    }

    #[test]
    fn test_out_of_bounds() {
        let bytes = [0u8; 8];
        let reader = RegionReader::new(&bytes);
        assert_eq!(
            reader.u32(6),
            Err(CaptureError::OutOfBounds {
                offset: 6,
                len: 4,
                size: 8
            })
        );
        assert!(reader.bytes(usize::MAX, 2).is_err());
        assert!(reader.words::<3>(0).is_err());
    }

    #[test]
    fn test_writer() -> CaptureResult<()> {
        let mut bytes = [0xFFu8; 8];
        let mut writer = RegionWriter::new(&mut bytes);
        writer.zero();
        writer.put_u32(4, 0x7764_7473)?;
        assert!(writer.put_u32(5, 0).is_err());
        assert_eq!(RegionReader::new(&bytes).u32(4)?, 0x7764_7473);
        assert_eq!(RegionReader::new(&bytes).u32(0)?, 0);
        Ok(())
    }
}
