//! The 32-byte internal header at $FFC0-$FFDF (CPU view).
//!
//! Physical location in the file depends on the mapping mode:
//! LoROM $7FC0, HiROM $FFC0, ExHiROM $40FFC0. Fields per the SNES
//! convention: 21-byte title, map mode ($FFD5), cartridge type ($FFD6),
//! ROM size code ($FFD7, `1 << code` KiB), SRAM size code ($FFD8),
//! region ($FFD9), complement check ($FFDC), checksum ($FFDE).

use std::fmt;

use crate::mapping::MappingMode;

/// Length of the header block in bytes.
pub const HEADER_LEN: usize = 0x20;

/// Title field length: 21 ASCII bytes, space padded.
const TITLE_LEN: usize = 21;

const MAP_MODE: usize = 0x15;
const CARTRIDGE_TYPE: usize = 0x16;
const ROM_SIZE_CODE: usize = 0x17;
const SRAM_SIZE_CODE: usize = 0x18;
const REGION: usize = 0x19;
const COMPLEMENT: usize = 0x1C;
const CHECKSUM: usize = 0x1E;

/// Parsed internal header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomHeader {
    /// Title, trailing padding trimmed.
    pub title: String,
    /// Raw map-mode byte (FastROM bit included).
    pub map_mode: u8,
    pub cartridge_type: u8,
    /// ROM size as a power-of-two code: `1 << code` KiB.
    pub rom_size_code: u8,
    pub sram_size_code: u8,
    pub region: u8,
    pub complement: u16,
    pub checksum: u16,
}

/// The header block does not fit inside the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderError {
    pub header_offset: usize,
    pub rom_len: usize,
    pub mode: MappingMode,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} header at ${:06X} does not fit in a {} byte ROM",
            self.mode, self.header_offset, self.rom_len
        )
    }
}

impl std::error::Error for HeaderError {}

impl RomHeader {
    /// Parse the header block at the mode's physical location.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if the buffer is too small to contain the
    /// header for this mode.
    pub fn parse(rom: &[u8], mode: MappingMode) -> Result<Self, HeaderError> {
        let base = header_range(rom, mode)?;
        let block = &rom[base..base + HEADER_LEN];

        let title: String = block[..TITLE_LEN]
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();

        Ok(Self {
            title: title.trim_end().to_string(),
            map_mode: block[MAP_MODE],
            cartridge_type: block[CARTRIDGE_TYPE],
            rom_size_code: block[ROM_SIZE_CODE],
            sram_size_code: block[SRAM_SIZE_CODE],
            region: block[REGION],
            complement: u16::from_le_bytes([block[COMPLEMENT], block[COMPLEMENT + 1]]),
            checksum: u16::from_le_bytes([block[CHECKSUM], block[CHECKSUM + 1]]),
        })
    }

    /// Mapping mode declared by the map-mode byte, if recognized.
    #[must_use]
    pub fn declared_mode(&self) -> Option<MappingMode> {
        MappingMode::from_mode_byte(self.map_mode)
    }

    /// ROM size the size code declares, in bytes.
    #[must_use]
    pub fn declared_rom_bytes(&self) -> usize {
        (1usize << self.rom_size_code) * 1024
    }
}

/// Validate that the mode's header block fits, returning its base offset.
///
/// # Errors
///
/// Returns [`HeaderError`] if the buffer is too small.
pub fn header_range(rom: &[u8], mode: MappingMode) -> Result<usize, HeaderError> {
    let base = mode.header_offset();
    if base + HEADER_LEN > rom.len() {
        return Err(HeaderError { header_offset: base, rom_len: rom.len(), mode });
    }
    Ok(base)
}

/// File offset of the 2-byte complement field for this mode.
#[must_use]
pub fn complement_offset(mode: MappingMode) -> usize {
    mode.header_offset() + COMPLEMENT
}

/// File offset of the 2-byte checksum field for this mode.
#[must_use]
pub fn checksum_offset(mode: MappingMode) -> usize {
    mode.header_offset() + CHECKSUM
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lorom_with_header() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        let base = MappingMode::LoRom.header_offset();
        rom[base..base + TITLE_LEN].copy_from_slice(b"TEST CART            ");
        rom[base + MAP_MODE] = 0x30; // LoROM + FastROM
        rom[base + ROM_SIZE_CODE] = 0x05; // 32 KiB
        rom[base + REGION] = 0x01; // USA
        rom[base + COMPLEMENT] = 0x34;
        rom[base + COMPLEMENT + 1] = 0x12;
        rom[base + CHECKSUM] = 0xCB;
        rom[base + CHECKSUM + 1] = 0xED;
        rom
    }

    #[test]
    fn parses_fields_little_endian() {
        let rom = lorom_with_header();
        let header = RomHeader::parse(&rom, MappingMode::LoRom).expect("fits");
        assert_eq!(header.title, "TEST CART");
        assert_eq!(header.declared_mode(), Some(MappingMode::LoRom));
        assert_eq!(header.rom_size_code, 0x05);
        assert_eq!(header.declared_rom_bytes(), 0x8000);
        assert_eq!(header.region, 0x01);
        assert_eq!(header.complement, 0x1234);
        assert_eq!(header.checksum, 0xEDCB);
    }

    #[test]
    fn header_must_fit_in_buffer() {
        let rom = vec![0u8; 0x8000];
        let err = RomHeader::parse(&rom, MappingMode::HiRom).expect_err("too small");
        assert_eq!(err.header_offset, 0xFFC0);
        assert_eq!(err.rom_len, 0x8000);
    }

    #[test]
    fn checksum_fields_sit_at_the_end_of_the_block() {
        assert_eq!(complement_offset(MappingMode::LoRom), 0x7FDC);
        assert_eq!(checksum_offset(MappingMode::LoRom), 0x7FDE);
        assert_eq!(checksum_offset(MappingMode::HiRom), 0xFFDE);
        assert_eq!(checksum_offset(MappingMode::ExHiRom), 0x40_FFDE);
    }
}
