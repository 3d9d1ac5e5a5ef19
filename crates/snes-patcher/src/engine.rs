//! The patch engine: atomic application of catalogued byte edits.
//!
//! Every application works on a clone of the caller's image; an error at
//! any point drops the clone, so the input is bit-identical afterwards by
//! construction and no partially-patched buffer ever escapes. The header
//! checksum is repaired exactly once, after the last byte edit, because
//! it depends on the complete final state of the buffer.

use std::time::SystemTime;

use snes_catalog::{Discovery, DiscoveryCatalog, DiscoveryId};
use snes_rom::{checksum, mapping, RomImage};

use crate::patch::{Patch, PatchError, PatchValue};

/// One patch in a batch: the discovery to write through and the value.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub id: DiscoveryId,
    pub value: PatchValue,
}

impl PatchRequest {
    #[must_use]
    pub fn new(id: impl Into<DiscoveryId>, value: PatchValue) -> Self {
        Self { id: id.into(), value }
    }
}

/// A successfully patched image with the record of every edit made.
#[derive(Debug, Clone)]
pub struct PatchedImage {
    pub image: RomImage,
    pub patches: Vec<Patch>,
}

/// Applies catalogued patches to ROM images.
///
/// Holds the catalog by reference: multiple engines over different
/// catalogs can coexist, and tests inject their own.
pub struct PatchEngine<'a> {
    catalog: &'a DiscoveryCatalog,
}

impl<'a> PatchEngine<'a> {
    #[must_use]
    pub fn new(catalog: &'a DiscoveryCatalog) -> Self {
        Self { catalog }
    }

    /// Apply a single patch, returning a new image with a repaired
    /// checksum. The input image is never mutated.
    ///
    /// # Errors
    ///
    /// Any [`PatchError`]; on error the input is untouched.
    pub fn apply_patch(
        &self,
        image: &RomImage,
        id: &DiscoveryId,
        value: &PatchValue,
    ) -> Result<PatchedImage, PatchError> {
        let discovery = self.lookup(id)?;
        let mut working = image.clone();
        let patch = apply_one(&mut working, discovery, value)?;
        seal(&mut working)?;
        Ok(PatchedImage { image: working, patches: vec![patch] })
    }

    /// Apply a batch atomically: patches are ordered so dependencies come
    /// first, every pre-check runs before the result is exposed, and the
    /// checksum is written once after the final edit. If any individual
    /// patch fails, the whole batch aborts with
    /// [`PatchError::PartialBatchFailure`] and the caller's image is
    /// bit-identical to its input.
    ///
    /// # Errors
    ///
    /// [`PatchError::DuplicateRequest`] / [`PatchError::ConflictingDiscoveries`]
    /// for ill-formed batches, [`PatchError::Catalog`] for ordering
    /// failures, [`PatchError::PartialBatchFailure`] when a member fails.
    pub fn apply_batch(
        &self,
        image: &RomImage,
        requests: &[PatchRequest],
    ) -> Result<PatchedImage, PatchError> {
        for (i, request) in requests.iter().enumerate() {
            if requests[..i].iter().any(|r| r.id == request.id) {
                return Err(PatchError::DuplicateRequest(request.id.clone()));
            }
        }
        self.check_conflicts(requests)?;

        let ids: Vec<DiscoveryId> = requests.iter().map(|r| r.id.clone()).collect();
        let order = self.catalog.resolve_dependency_order(&ids)?;

        let by_id: std::collections::BTreeMap<&DiscoveryId, &PatchRequest> =
            requests.iter().map(|r| (&r.id, r)).collect();

        let mut working = image.clone();
        let mut patches = Vec::with_capacity(order.len());
        for (index, id) in order.iter().enumerate() {
            let Some(request) = by_id.get(id) else {
                continue; // order only ever contains requested ids
            };
            let result = self
                .lookup(id)
                .and_then(|discovery| apply_one(&mut working, discovery, &request.value));
            match result {
                Ok(patch) => patches.push(patch),
                Err(cause) => {
                    return Err(PatchError::PartialBatchFailure {
                        id: id.clone(),
                        index,
                        cause: Box::new(cause),
                    });
                }
            }
        }
        seal(&mut working)?;
        Ok(PatchedImage { image: working, patches })
    }

    fn lookup(&self, id: &DiscoveryId) -> Result<&'a Discovery, PatchError> {
        self.catalog
            .get(id)
            .ok_or_else(|| PatchError::Catalog(snes_catalog::CatalogError::UnknownDiscovery(id.clone())))
    }

    /// Reject batches whose members declare each other as conflicts.
    fn check_conflicts(&self, requests: &[PatchRequest]) -> Result<(), PatchError> {
        for request in requests {
            let Some(discovery) = self.catalog.get(&request.id) else {
                continue; // surfaces as UnknownDiscovery during ordering
            };
            for other in requests {
                if discovery.conflicts.contains(&other.id) {
                    return Err(PatchError::ConflictingDiscoveries {
                        a: request.id.clone(),
                        b: other.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Write one discovery's value into the working buffer. All pre-checks
/// (mode match, encoding, translation, bounds) run before any byte moves.
fn apply_one(
    working: &mut RomImage,
    discovery: &Discovery,
    value: &PatchValue,
) -> Result<Patch, PatchError> {
    let image_mode = working.mapping_mode();
    if discovery.mapping_mode != image_mode {
        return Err(PatchError::MappingModeMismatch {
            id: discovery.id.clone(),
            discovery_mode: discovery.mapping_mode,
            image_mode,
        });
    }

    let new_bytes = value.encode(discovery)?;

    // The offset must resolve under the image's current mode; an offset
    // the CPU could never read is a corrupt discovery, not a patch site.
    mapping::to_cpu_address(discovery.offset, image_mode)
        .map_err(|source| PatchError::Address { id: discovery.id.clone(), source })?;

    let start = discovery.offset.0 as usize;
    let end = start + new_bytes.len();
    if end > working.len() {
        return Err(PatchError::OutOfBounds {
            id: discovery.id.clone(),
            offset: discovery.offset,
            end: end as u32,
            rom_len: working.len(),
        });
    }

    let old_bytes = working.bytes()[start..end].to_vec();
    working.bytes_mut()[start..end].copy_from_slice(&new_bytes);

    Ok(Patch {
        discovery_id: discovery.id.clone(),
        offset: discovery.offset,
        old_bytes,
        new_bytes,
        applied_at: SystemTime::now(),
    })
}

/// Final step of every application: repair the checksum pair, refresh the
/// cached header, and verify. A verification failure here is an engine
/// defect, surfaced as the fatal [`PatchError::ChecksumMismatch`].
fn seal(working: &mut RomImage) -> Result<(), PatchError> {
    let mode = working.mapping_mode();
    let computed = checksum::write_checksum(working.bytes_mut(), mode)?;
    working.refresh_header()?;
    if !checksum::verify_checksum(working.bytes(), mode)? {
        return Err(PatchError::ChecksumMismatch {
            computed,
            stored: working.header().checksum,
        });
    }
    Ok(())
}
