//! Patch values, their byte encoding, and applied-patch records.

use std::fmt;
use std::time::SystemTime;

use snes_catalog::{CatalogError, Discovery, DiscoveryId, ValueEncoding};
use snes_rom::{AddressError, FileOffset, HeaderError, MappingMode};

/// A value to write through a discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValue {
    /// Logical integer, encoded little-endian at the discovery's width.
    Int(u64),
    /// Literal bytes, length must equal the discovery's width.
    Bytes(Vec<u8>),
}

impl PatchValue {
    /// Encode the value for a discovery, range-checked against its
    /// declared width. Values that do not fit are rejected, never
    /// silently truncated.
    ///
    /// # Errors
    ///
    /// [`PatchError::SizeMismatch`] if the value needs more bytes than
    /// the discovery declares (or a byte literal has the wrong length);
    /// [`PatchError::EncodingMismatch`] for an integer aimed at a
    /// raw-bytes discovery.
    pub fn encode(&self, discovery: &Discovery) -> Result<Vec<u8>, PatchError> {
        let width = discovery.size;
        match self {
            Self::Int(value) => {
                if discovery.encoding != ValueEncoding::LittleEndian {
                    return Err(PatchError::EncodingMismatch {
                        id: discovery.id.clone(),
                        encoding: discovery.encoding,
                    });
                }
                if *value > width.max_value() {
                    return Err(PatchError::SizeMismatch {
                        id: discovery.id.clone(),
                        offset: discovery.offset,
                        expected: width.bytes(),
                        actual: min_bytes(*value),
                    });
                }
                Ok(value.to_le_bytes()[..width.bytes()].to_vec())
            }
            Self::Bytes(bytes) => {
                if bytes.len() != width.bytes() {
                    return Err(PatchError::SizeMismatch {
                        id: discovery.id.clone(),
                        offset: discovery.offset,
                        expected: width.bytes(),
                        actual: bytes.len(),
                    });
                }
                Ok(bytes.clone())
            }
        }
    }
}

/// Fewest bytes that can represent the value.
fn min_bytes(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

/// Record of one applied byte edit: exact before/after spans for
/// diffing and rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub discovery_id: DiscoveryId,
    pub offset: FileOffset,
    pub old_bytes: Vec<u8>,
    pub new_bytes: Vec<u8>,
    pub applied_at: SystemTime,
}

impl Patch {
    /// File offsets this patch touched.
    pub fn span(&self) -> impl Iterator<Item = u32> {
        self.offset.0..self.offset.0 + self.new_bytes.len() as u32
    }

    /// Whether the patch wrote into the mode's header block.
    #[must_use]
    pub fn targets_header(&self, mode: MappingMode) -> bool {
        let header = mode.header_offset() as u32;
        let end = self.offset.0 + self.new_bytes.len() as u32;
        self.offset.0 < header + 0x20 && header < end
    }
}

/// Patch application failure. Every variant names the implicated
/// discovery and byte offsets where they exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Value does not fit the discovery's declared width, expressed in
    /// bytes needed vs bytes declared.
    SizeMismatch {
        id: DiscoveryId,
        offset: FileOffset,
        expected: usize,
        actual: usize,
    },
    /// Integer value aimed at a discovery that holds raw bytes.
    EncodingMismatch { id: DiscoveryId, encoding: ValueEncoding },
    /// The discovery's offset does not resolve under the image's mode.
    Address { id: DiscoveryId, source: AddressError },
    /// The write would land past the end of the buffer.
    OutOfBounds {
        id: DiscoveryId,
        offset: FileOffset,
        end: u32,
        rom_len: usize,
    },
    /// Discovery was recorded under a different mapping mode than the
    /// image uses; the engine refuses to guess a cross-mode translation.
    MappingModeMismatch {
        id: DiscoveryId,
        discovery_mode: MappingMode,
        image_mode: MappingMode,
    },
    /// Two requested discoveries declare each other as conflicts.
    ConflictingDiscoveries { a: DiscoveryId, b: DiscoveryId },
    /// The same discovery was requested twice in one batch.
    DuplicateRequest(DiscoveryId),
    /// Post-patch checksum failed to verify. Always fatal: the engine
    /// corrupted the buffer, this is never a user-recoverable condition.
    ChecksumMismatch { computed: u16, stored: u16 },
    /// Buffer cannot contain the mode's header.
    Header(HeaderError),
    /// Catalog lookup or ordering failure.
    Catalog(CatalogError),
    /// A patch inside a batch failed; the whole batch was rolled back
    /// and the caller's image is bit-identical to its input.
    PartialBatchFailure {
        id: DiscoveryId,
        index: usize,
        cause: Box<PatchError>,
    },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { id, offset, expected, actual } => write!(
                f,
                "value for '{id}' at {offset} needs {actual} byte(s) but the discovery declares {expected}"
            ),
            Self::EncodingMismatch { id, encoding } => {
                write!(f, "integer value for '{id}' but its encoding is {encoding:?}")
            }
            Self::Address { id, source } => write!(f, "discovery '{id}': {source}"),
            Self::OutOfBounds { id, offset, end, rom_len } => write!(
                f,
                "write for '{id}' spans {offset}..${end:06X}, past the {rom_len} byte buffer"
            ),
            Self::MappingModeMismatch { id, discovery_mode, image_mode } => write!(
                f,
                "discovery '{id}' was recorded under {discovery_mode} but the image is {image_mode}"
            ),
            Self::ConflictingDiscoveries { a, b } => {
                write!(f, "batch requests conflicting discoveries '{a}' and '{b}'")
            }
            Self::DuplicateRequest(id) => {
                write!(f, "discovery '{id}' requested twice in one batch")
            }
            Self::ChecksumMismatch { computed, stored } => write!(
                f,
                "post-patch checksum mismatch: computed ${computed:04X}, stored ${stored:04X}"
            ),
            Self::Header(err) => err.fmt(f),
            Self::Catalog(err) => err.fmt(f),
            Self::PartialBatchFailure { id, index, cause } => write!(
                f,
                "batch aborted at patch {index} ('{id}'), image rolled back: {cause}"
            ),
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Address { source, .. } => Some(source),
            Self::Header(err) => Some(err),
            Self::Catalog(err) => Some(err),
            Self::PartialBatchFailure { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl From<HeaderError> for PatchError {
    fn from(err: HeaderError) -> Self {
        Self::Header(err)
    }
}

impl From<CatalogError> for PatchError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}
