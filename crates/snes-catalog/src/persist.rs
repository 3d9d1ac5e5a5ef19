//! Catalog persistence: a JSON map keyed by discovery id.
//!
//! Loading re-registers every record so the registry invariants (unique
//! ids, acknowledged overlaps) are re-checked against the persisted data
//! rather than trusted blindly.

use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::{CatalogError, DiscoveryCatalog};
use crate::discovery::{Discovery, DiscoveryId};

/// Persistence failure.
#[derive(Debug)]
pub enum PersistError {
    Json(serde_json::Error),
    /// A map key does not match the id stored inside its record.
    KeyMismatch { key: DiscoveryId, id: DiscoveryId },
    /// A persisted record violates a registry invariant.
    Catalog(CatalogError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "catalog JSON error: {err}"),
            Self::KeyMismatch { key, id } => {
                write!(f, "catalog key '{key}' holds a record with id '{id}'")
            }
            Self::Catalog(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Catalog(err) => Some(err),
            Self::KeyMismatch { .. } => None,
        }
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<CatalogError> for PersistError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

/// Serialize the catalog to pretty JSON.
///
/// # Errors
///
/// Returns [`PersistError::Json`] on serialization failure.
pub fn to_json(catalog: &DiscoveryCatalog) -> Result<String, PersistError> {
    let map: BTreeMap<&DiscoveryId, &Discovery> =
        catalog.iter().map(|d| (&d.id, d)).collect();
    Ok(serde_json::to_string_pretty(&map)?)
}

/// Rebuild a catalog from its JSON form.
///
/// # Errors
///
/// Returns [`PersistError::Json`] for malformed JSON,
/// [`PersistError::KeyMismatch`] if a key disagrees with its record, or
/// [`PersistError::Catalog`] if a record violates a registry invariant.
pub fn from_json(json: &str) -> Result<DiscoveryCatalog, PersistError> {
    let map: BTreeMap<DiscoveryId, Discovery> = serde_json::from_str(json)?;
    let mut catalog = DiscoveryCatalog::new();
    for (key, discovery) in map {
        if key != discovery.id {
            return Err(PersistError::KeyMismatch { key, id: discovery.id });
        }
        catalog.register(discovery)?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Category, Confidence, ValueEncoding, ValueSize};
    use snes_rom::{FileOffset, MappingMode};

    fn sample_catalog() -> DiscoveryCatalog {
        let mut catalog = DiscoveryCatalog::new();
        catalog
            .register(
                Discovery::new(
                    "link-hearts",
                    Category::Memory,
                    FileOffset(0x2_74F4),
                    MappingMode::LoRom,
                    ValueSize::One,
                )
                .with_description("starting heart containers")
                .with_tag("player")
                .with_confidence(Confidence::Verified),
            )
            .expect("register");
        catalog
            .register(
                Discovery::new(
                    "sword-sprite",
                    Category::Sprite,
                    FileOffset(0x8_0000),
                    MappingMode::LoRom,
                    ValueSize::Four,
                )
                .with_encoding(ValueEncoding::RawBytes)
                .with_dependency("link-hearts"),
            )
            .expect("register");
        catalog
    }

    #[test]
    fn round_trip_preserves_confidence_and_relationships() {
        let original = sample_catalog();
        let json = to_json(&original).expect("serialize");
        let restored = from_json(&json).expect("deserialize");

        assert_eq!(restored.len(), original.len());
        let hearts = restored.get(&"link-hearts".into()).expect("present");
        assert_eq!(hearts.confidence, Confidence::Verified);
        assert_eq!(hearts.tags, vec!["player".to_string()]);

        let sprite = restored.get(&"sword-sprite".into()).expect("present");
        assert_eq!(sprite.encoding, ValueEncoding::RawBytes);
        assert!(sprite.dependencies.contains(&"link-hearts".into()));
        assert_eq!(sprite.mapping_mode, MappingMode::LoRom);
    }

    #[test]
    fn key_record_disagreement_is_rejected() {
        let json = r#"{
            "wrong-key": {
                "id": "link-hearts",
                "category": "memory",
                "offset": 160964,
                "mapping_mode": "LoRom",
                "size": "one",
                "confidence": "unverified",
                "encoding": "little_endian"
            }
        }"#;
        assert!(matches!(from_json(json), Err(PersistError::KeyMismatch { .. })));
    }

    #[test]
    fn loading_rechecks_registry_invariants() {
        // Two verified records over the same byte, no acknowledgement
        let json = r#"{
            "a": {
                "id": "a",
                "category": "memory",
                "offset": 256,
                "mapping_mode": "LoRom",
                "size": "two",
                "confidence": "verified",
                "encoding": "little_endian"
            },
            "b": {
                "id": "b",
                "category": "memory",
                "offset": 257,
                "mapping_mode": "LoRom",
                "size": "one",
                "confidence": "verified",
                "encoding": "little_endian"
            }
        }"#;
        assert!(matches!(
            from_json(json),
            Err(PersistError::Catalog(CatalogError::OverlapConflict { .. }))
        ));
    }
}
