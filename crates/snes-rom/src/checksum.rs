//! Checksum/complement codec for the internal header.
//!
//! The checksum is the 16-bit wrapping sum of every ROM byte. Because the
//! stored pair lives inside the region being summed, the four field bytes
//! are substituted during the sum: checksum bytes count as $FF $FF and
//! complement bytes as $00 $00. Any valid written pair sums to the same
//! $1FE, so a ROM that has been through [`write_checksum`] re-verifies
//! without further substitution bookkeeping.
//!
//! This must run as the last step of any patch batch: the sum depends on
//! the complete final state of the buffer.

use crate::header::{checksum_offset, complement_offset, header_range, HeaderError};
use crate::mapping::MappingMode;

/// Compute the header checksum over the buffer.
///
/// # Errors
///
/// Returns [`HeaderError`] if the buffer cannot contain the mode's header.
pub fn compute_checksum(rom: &[u8], mode: MappingMode) -> Result<u16, HeaderError> {
    header_range(rom, mode)?;
    let comp = complement_offset(mode);
    let chk = checksum_offset(mode);

    let mut sum: u16 = 0;
    for (offset, &byte) in rom.iter().enumerate() {
        let value = if offset == chk || offset == chk + 1 {
            0xFF
        } else if offset == comp || offset == comp + 1 {
            0x00
        } else {
            byte
        };
        sum = sum.wrapping_add(u16::from(value));
    }
    Ok(sum)
}

/// The complement of a checksum: the two XOR to $FFFF.
#[must_use]
pub const fn complement(checksum: u16) -> u16 {
    checksum ^ 0xFFFF
}

/// Recompute the checksum and write the pair into the header in place.
///
/// Returns the checksum that was written.
///
/// # Errors
///
/// Returns [`HeaderError`] if the buffer cannot contain the mode's header.
pub fn write_checksum(rom: &mut [u8], mode: MappingMode) -> Result<u16, HeaderError> {
    let sum = compute_checksum(rom, mode)?;
    let comp = complement_offset(mode);
    let chk = checksum_offset(mode);
    rom[comp..comp + 2].copy_from_slice(&complement(sum).to_le_bytes());
    rom[chk..chk + 2].copy_from_slice(&sum.to_le_bytes());
    Ok(sum)
}

/// Recompute and compare against the stored pair.
///
/// True only when the stored checksum matches the recomputed sum and the
/// stored complement is its exact inverse.
///
/// # Errors
///
/// Returns [`HeaderError`] if the buffer cannot contain the mode's header.
pub fn verify_checksum(rom: &[u8], mode: MappingMode) -> Result<bool, HeaderError> {
    let sum = compute_checksum(rom, mode)?;
    let comp = complement_offset(mode);
    let chk = checksum_offset(mode);
    let stored_complement = u16::from_le_bytes([rom[comp], rom[comp + 1]]);
    let stored_checksum = u16::from_le_bytes([rom[chk], rom[chk + 1]]);
    Ok(stored_checksum == sum && stored_complement == complement(sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_verify_round_trips() {
        for mode in [MappingMode::LoRom, MappingMode::HiRom] {
            let mut rom = vec![0u8; 0x10_0000];
            for (i, byte) in rom.iter_mut().enumerate() {
                *byte = (i % 251) as u8;
            }
            assert!(!verify_checksum(&rom, mode).expect("fits"));
            write_checksum(&mut rom, mode).expect("fits");
            assert!(verify_checksum(&rom, mode).expect("fits"));
        }
    }

    #[test]
    fn stored_pair_xors_to_ffff() {
        let mut rom = vec![0x5Au8; 0x8000];
        let sum = write_checksum(&mut rom, MappingMode::LoRom).expect("fits");
        assert_eq!(sum ^ complement(sum), 0xFFFF);

        let comp = u16::from_le_bytes([rom[0x7FDC], rom[0x7FDD]]);
        let chk = u16::from_le_bytes([rom[0x7FDE], rom[0x7FDF]]);
        assert_eq!(chk ^ comp, 0xFFFF);
        assert_eq!(chk, sum);
    }

    #[test]
    fn checksum_tracks_byte_edits() {
        let mut rom = vec![0u8; 0x8000];
        let before = write_checksum(&mut rom, MappingMode::LoRom).expect("fits");
        rom[0x1234] = 0xE7;
        let after = write_checksum(&mut rom, MappingMode::LoRom).expect("fits");
        assert_eq!(after, before.wrapping_add(0xE7));
        assert!(verify_checksum(&rom, MappingMode::LoRom).expect("fits"));
    }

    #[test]
    fn writing_twice_is_stable() {
        let mut rom = vec![0x11u8; 0x8000];
        let first = write_checksum(&mut rom, MappingMode::LoRom).expect("fits");
        let second = write_checksum(&mut rom, MappingMode::LoRom).expect("fits");
        assert_eq!(first, second);
    }

    #[test]
    fn buffer_too_small_for_header_is_an_error() {
        let mut rom = vec![0u8; 0x4000];
        assert!(compute_checksum(&rom, MappingMode::LoRom).is_err());
        assert!(write_checksum(&mut rom, MappingMode::LoRom).is_err());
    }
}
