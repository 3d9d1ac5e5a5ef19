//! SNES cartridge ROM plumbing: image container, address translation,
//! header parsing, and the checksum/complement codec.
//!
//! The three mapping modes (LoROM, HiROM, ExHiROM) each define their own
//! rule for turning a file offset into a CPU bank:address pair and their
//! own header location. Everything here treats them as distinct algorithms
//! selected by [`MappingMode`], never as special cases of one formula.

pub mod checksum;
pub mod header;
mod image;
pub mod mapping;

pub use header::{HeaderError, RomHeader, HEADER_LEN};
pub use image::{ImageError, RomImage, COPIER_HEADER_LEN};
pub use mapping::{AddressError, CpuAddress, FileOffset, MappingMode};
