//! Discovery records: catalogued ROM byte ranges with semantics attached.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use snes_rom::{FileOffset, MappingMode};

/// Unique identifier for a catalogued discovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryId(pub String);

impl fmt::Display for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DiscoveryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of ROM location a discovery names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Item,
    Memory,
    Sprite,
    Routine,
}

/// Categorical trust rating, ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Unverified,
    Likely,
    Verified,
}

/// Width of the value a discovery holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSize {
    One,
    Two,
    Four,
}

impl ValueSize {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Largest integer value the width can hold.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::One => 0xFF,
            Self::Two => 0xFFFF,
            Self::Four => 0xFFFF_FFFF,
        }
    }
}

/// How a value is laid out in the ROM bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueEncoding {
    /// Multi-byte integer, least significant byte first (65816 convention).
    LittleEndian,
    /// Uninterpreted bytes, written as given.
    RawBytes,
}

/// A catalogued, named ROM byte range with documented semantic meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: DiscoveryId,
    pub category: Category,
    /// File offset at the time of discovery.
    pub offset: FileOffset,
    /// Mapping mode the offset was recorded under.
    pub mapping_mode: MappingMode,
    pub size: ValueSize,
    pub confidence: Confidence,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Discoveries that must be applied before this one in a batch.
    #[serde(default)]
    pub dependencies: BTreeSet<DiscoveryId>,
    /// Discoveries that must never be applied alongside this one.
    #[serde(default)]
    pub conflicts: BTreeSet<DiscoveryId>,
    pub encoding: ValueEncoding,
    /// Marks an intentional multi-field co-write, exempting this entry
    /// from the overlapping-verified-ranges check.
    #[serde(default)]
    pub acknowledged_overlap: bool,
}

impl Discovery {
    /// A fresh, unverified little-endian discovery with no relationships.
    #[must_use]
    pub fn new(
        id: impl Into<DiscoveryId>,
        category: Category,
        offset: FileOffset,
        mapping_mode: MappingMode,
        size: ValueSize,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            offset,
            mapping_mode,
            size,
            confidence: Confidence::Unverified,
            description: String::new(),
            tags: Vec::new(),
            dependencies: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            encoding: ValueEncoding::LittleEndian,
            acknowledged_overlap: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<DiscoveryId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    #[must_use]
    pub fn with_conflict(mut self, id: impl Into<DiscoveryId>) -> Self {
        self.conflicts.insert(id.into());
        self
    }

    #[must_use]
    pub fn acknowledging_overlap(mut self) -> Self {
        self.acknowledged_overlap = true;
        self
    }

    /// The file-offset byte range this discovery claims.
    #[must_use]
    pub fn range(&self) -> Range<u32> {
        self.offset.0..self.offset.0 + self.size.bytes() as u32
    }

    /// Whether the two discoveries claim intersecting byte ranges.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let a = self.range();
        let b = other.range();
        a.start < b.end && b.start < a.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(offset: u32, size: ValueSize) -> Discovery {
        Discovery::new(
            format!("d-{offset:X}").as_str(),
            Category::Memory,
            FileOffset(offset),
            MappingMode::LoRom,
            size,
        )
    }

    #[test]
    fn range_covers_declared_width() {
        assert_eq!(at(0x100, ValueSize::One).range(), 0x100..0x101);
        assert_eq!(at(0x100, ValueSize::Four).range(), 0x100..0x104);
    }

    #[test]
    fn overlap_is_symmetric_and_respects_width() {
        let two = at(0x100, ValueSize::Two);
        let adjacent = at(0x102, ValueSize::One);
        let inside = at(0x101, ValueSize::One);
        assert!(!two.overlaps(&adjacent));
        assert!(!adjacent.overlaps(&two));
        assert!(two.overlaps(&inside));
        assert!(inside.overlaps(&two));
    }

    #[test]
    fn confidence_orders_by_trust() {
        assert!(Confidence::Unverified < Confidence::Likely);
        assert!(Confidence::Likely < Confidence::Verified);
    }
}
