//! Cartridge mapping modes and file-offset ↔ CPU-address translation.
//!
//! - LoROM maps the ROM in 32K chunks to the upper half ($8000-$FFFF) of
//!   banks $00-$7D (mirrored at $80-$FF).
//! - HiROM maps 64K banks contiguously starting at bank $C0.
//! - ExHiROM is HiROM for the first 4 MiB, with the remainder spilling
//!   into banks $40-$7D.
//!
//! Offsets and CPU addresses are distinct newtypes so the two spaces
//! cannot be accidentally interchanged.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// LoROM bank window size: 32 KiB mapped at $8000-$FFFF.
const LOROM_BANK: u32 = 0x8000;
/// HiROM/ExHiROM bank size: a full 64 KiB bank.
const HIROM_BANK: u32 = 0x1_0000;
/// First 4 MiB of an ExHiROM image map like HiROM.
const EXHIROM_SPLIT: u32 = 0x40_0000;

/// Cartridge memory-mapping convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MappingMode {
    /// 32K chunks at $8000-$FFFF of banks $00-$7D. Header at $7FC0.
    LoRom,
    /// 64K banks from $C0. Header at $FFC0.
    HiRom,
    /// HiROM extended past 4 MiB into banks $40-$7D. Header at $40FFC0.
    ExHiRom,
}

impl MappingMode {
    /// File offset of the 32-byte header block for this mode.
    #[must_use]
    pub const fn header_offset(self) -> usize {
        match self {
            Self::LoRom => 0x7FC0,
            Self::HiRom => 0xFFC0,
            Self::ExHiRom => 0x40_FFC0,
        }
    }

    /// The map-mode byte this mode stores at header offset $15 ($FFD5).
    /// FastROM variants set bit 4 on top of these values.
    #[must_use]
    pub const fn mode_byte(self) -> u8 {
        match self {
            Self::LoRom => 0x20,
            Self::HiRom => 0x21,
            Self::ExHiRom => 0x25,
        }
    }

    /// Decode a header map-mode byte, ignoring the FastROM speed bit.
    #[must_use]
    pub const fn from_mode_byte(byte: u8) -> Option<Self> {
        match byte & !0x10 {
            0x20 => Some(Self::LoRom),
            0x21 => Some(Self::HiRom),
            0x25 => Some(Self::ExHiRom),
            _ => None,
        }
    }

    /// Largest file offset (exclusive) addressable under this mode.
    #[must_use]
    pub const fn addressable_bytes(self) -> u32 {
        match self {
            // Banks $00-$7D, 32K each
            Self::LoRom => 0x7E * LOROM_BANK,
            // Banks $C0-$FF, 64K each
            Self::HiRom => 0x40 * HIROM_BANK,
            // HiROM range plus banks $40-$7D
            Self::ExHiRom => EXHIROM_SPLIT + 0x3E * HIROM_BANK,
        }
    }
}

impl fmt::Display for MappingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoRom => "LoROM",
            Self::HiRom => "HiROM",
            Self::ExHiRom => "ExHiROM",
        };
        f.write_str(name)
    }
}

/// A byte position in the ROM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileOffset(pub u32);

impl fmt::Display for FileOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:06X}", self.0)
    }
}

/// A 65816 bank:address pair as the CPU sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CpuAddress {
    pub bank: u8,
    pub addr: u16,
}

impl fmt::Display for CpuAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:02X}:{:04X}", self.bank, self.addr)
    }
}

/// Translation failure: the input does not resolve under the given mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// File offset past the range the mode can map.
    OffsetOutOfRange { offset: FileOffset, mode: MappingMode },
    /// CPU bank:address outside the mode's ROM windows.
    CpuOutOfRange { cpu: CpuAddress, mode: MappingMode },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffsetOutOfRange { offset, mode } => {
                write!(f, "file offset {offset} is out of range for {mode}")
            }
            Self::CpuOutOfRange { cpu, mode } => {
                write!(f, "CPU address {cpu} does not map to ROM under {mode}")
            }
        }
    }
}

impl std::error::Error for AddressError {}

/// Translate a file offset to the CPU bank:address that reads it.
///
/// # Errors
///
/// Returns [`AddressError::OffsetOutOfRange`] if the offset exceeds what
/// the mode can map.
pub fn to_cpu_address(offset: FileOffset, mode: MappingMode) -> Result<CpuAddress, AddressError> {
    if offset.0 >= mode.addressable_bytes() {
        return Err(AddressError::OffsetOutOfRange { offset, mode });
    }
    let cpu = match mode {
        MappingMode::LoRom => CpuAddress {
            bank: (offset.0 / LOROM_BANK) as u8,
            addr: (LOROM_BANK + offset.0 % LOROM_BANK) as u16,
        },
        MappingMode::HiRom => CpuAddress {
            bank: 0xC0 + (offset.0 / HIROM_BANK) as u8,
            addr: (offset.0 % HIROM_BANK) as u16,
        },
        MappingMode::ExHiRom => {
            if offset.0 < EXHIROM_SPLIT {
                CpuAddress {
                    bank: 0xC0 + (offset.0 / HIROM_BANK) as u8,
                    addr: (offset.0 % HIROM_BANK) as u16,
                }
            } else {
                let past = offset.0 - EXHIROM_SPLIT;
                CpuAddress {
                    bank: 0x40 + (past / HIROM_BANK) as u8,
                    addr: (past % HIROM_BANK) as u16,
                }
            }
        }
    };
    Ok(cpu)
}

/// Translate a CPU bank:address back to the file offset it reads.
///
/// # Errors
///
/// Returns [`AddressError::CpuOutOfRange`] if the bank:address falls
/// outside the mode's ROM windows (e.g. LoROM lower halves, WRAM banks).
pub fn to_file_offset(cpu: CpuAddress, mode: MappingMode) -> Result<FileOffset, AddressError> {
    let err = AddressError::CpuOutOfRange { cpu, mode };
    let offset = match mode {
        MappingMode::LoRom => {
            // Banks $80-$FF mirror $00-$7F; $7E/$7F are WRAM, not ROM
            let bank = cpu.bank & 0x7F;
            if bank > 0x7D || cpu.addr < 0x8000 {
                return Err(err);
            }
            u32::from(bank) * LOROM_BANK + (u32::from(cpu.addr) - LOROM_BANK)
        }
        MappingMode::HiRom => {
            if !(0xC0..=0xFF).contains(&cpu.bank) {
                return Err(err);
            }
            u32::from(cpu.bank - 0xC0) * HIROM_BANK + u32::from(cpu.addr)
        }
        MappingMode::ExHiRom => match cpu.bank {
            0xC0..=0xFF => u32::from(cpu.bank - 0xC0) * HIROM_BANK + u32::from(cpu.addr),
            0x40..=0x7D => {
                EXHIROM_SPLIT + u32::from(cpu.bank - 0x40) * HIROM_BANK + u32::from(cpu.addr)
            }
            _ => return Err(err),
        },
    };
    Ok(FileOffset(offset))
}
