//! Owned ROM image container.
//!
//! A `RomImage` wraps the raw byte buffer together with its mapping mode
//! and a cached parse of the internal header. Construction validates the
//! size (power-of-two KiB, large enough for the mode's header) and strips
//! the 512-byte copier header some dump formats prepend. Images are
//! cheap-by-design to clone: every patch attempt works on a clone so the
//! original survives until validation succeeds.

use std::fmt;

use crate::header::{HeaderError, RomHeader};
use crate::mapping::MappingMode;

/// Length of the copier (SMC) header some backup units prepend.
pub const COPIER_HEADER_LEN: usize = 512;

/// Smallest supported image: 32 KiB, the minimum that fits a LoROM header.
const MIN_ROM_LEN: usize = 0x8000;

/// Image construction failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Buffer length is not a supported power-of-two-KiB size.
    UnsupportedSize(usize),
    /// Buffer cannot contain the mode's header block.
    Header(HeaderError),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSize(len) => write!(
                f,
                "unsupported ROM size: {len} bytes (expected a power-of-two KiB count, {MIN_ROM_LEN} minimum)"
            ),
            Self::Header(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<HeaderError> for ImageError {
    fn from(err: HeaderError) -> Self {
        Self::Header(err)
    }
}

/// An in-memory cartridge ROM with its mapping mode and cached header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomImage {
    data: Vec<u8>,
    mode: MappingMode,
    header: RomHeader,
}

impl RomImage {
    /// Build an image from raw bytes, stripping a copier header if present.
    ///
    /// A buffer sitting exactly 512 bytes past a KiB boundary is treated
    /// as a copier-headered dump and the prefix is removed before use.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::UnsupportedSize`] unless the (stripped)
    /// length is a power-of-two KiB count of at least 32 KiB, or
    /// [`ImageError::Header`] if the mode's header does not fit.
    pub fn from_bytes(mut data: Vec<u8>, mode: MappingMode) -> Result<Self, ImageError> {
        if data.len() % 1024 == COPIER_HEADER_LEN {
            data.drain(..COPIER_HEADER_LEN);
        }
        let kib = data.len() / 1024;
        if data.len() < MIN_ROM_LEN || data.len() % 1024 != 0 || !kib.is_power_of_two() {
            return Err(ImageError::UnsupportedSize(data.len()));
        }
        let header = RomHeader::parse(&data, mode)?;
        Ok(Self { data, mode, header })
    }

    /// Image length in bytes. Identical before and after any patch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Never true: construction rejects empty buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for patch application. Callers that touch header
    /// bytes must follow up with [`RomImage::refresh_header`].
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn mapping_mode(&self) -> MappingMode {
        self.mode
    }

    /// The header as parsed at construction or the last refresh.
    #[must_use]
    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    /// Re-parse the cached header after the buffer was mutated.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if the header no longer fits, which can
    /// only happen if a caller resized the buffer through `bytes_mut`.
    pub fn refresh_header(&mut self) -> Result<(), HeaderError> {
        self.header = RomHeader::parse(&self.data, self.mode)?;
        Ok(())
    }

    /// Whether the declared size code matches the actual buffer length.
    #[must_use]
    pub fn declared_size_matches(&self) -> bool {
        self.header.declared_rom_bytes() == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_lorom(len: usize) -> Vec<u8> {
        let mut rom = vec![0u8; len];
        let base = MappingMode::LoRom.header_offset();
        rom[base + 0x15] = 0x20;
        rom[base + 0x17] = ((len / 1024).trailing_zeros()) as u8;
        rom
    }

    #[test]
    fn accepts_power_of_two_kib_sizes() {
        for len in [0x8000, 0x10_0000, 0x40_0000] {
            let image = RomImage::from_bytes(plain_lorom(len), MappingMode::LoRom).expect("valid");
            assert_eq!(image.len(), len);
            assert!(image.declared_size_matches());
        }
    }

    #[test]
    fn rejects_odd_sizes() {
        for len in [0, 0x4000, 0x8001, 0xC000, 0x18_0000] {
            assert_eq!(
                RomImage::from_bytes(vec![0u8; len], MappingMode::LoRom),
                Err(ImageError::UnsupportedSize(len)),
            );
        }
    }

    #[test]
    fn strips_copier_header() {
        let mut dump = vec![0xAAu8; COPIER_HEADER_LEN];
        dump.extend_from_slice(&plain_lorom(0x8000));
        let image = RomImage::from_bytes(dump, MappingMode::LoRom).expect("stripped");
        assert_eq!(image.len(), 0x8000);
        assert_eq!(image.bytes()[0], 0x00);
    }

    #[test]
    fn header_is_cached_and_refreshable() {
        let mut image =
            RomImage::from_bytes(plain_lorom(0x8000), MappingMode::LoRom).expect("valid");
        assert_eq!(image.header().map_mode, 0x20);

        let region = MappingMode::LoRom.header_offset() + 0x19;
        image.bytes_mut()[region] = 0x02;
        assert_eq!(image.header().region, 0x00); // stale until refreshed
        image.refresh_header().expect("still fits");
        assert_eq!(image.header().region, 0x02);
    }

    #[test]
    fn hirom_image_needs_room_for_its_header() {
        assert!(matches!(
            RomImage::from_bytes(vec![0u8; 0x8000], MappingMode::HiRom),
            Err(ImageError::Header(_)),
        ));
    }
}
