//! The discovery registry and its confidence state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use snes_rom::FileOffset;

use crate::discovery::{Category, Confidence, Discovery, DiscoveryId};
use crate::report::{InvocationId, ValidationVerdict};

/// Registry operation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// `register` was handed an id that already exists.
    DuplicateId(DiscoveryId),
    /// The entry's byte range intersects a verified entry's range and
    /// neither side acknowledges the overlap as an intentional co-write.
    OverlapConflict {
        id: DiscoveryId,
        existing: DiscoveryId,
        offset: FileOffset,
    },
    /// No dependency-respecting order exists for the requested set.
    CyclicDependency(DiscoveryId),
    /// The id is not registered.
    UnknownDiscovery(DiscoveryId),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "discovery '{id}' is already registered"),
            Self::OverlapConflict { id, existing, offset } => write!(
                f,
                "discovery '{id}' at {offset} overlaps verified discovery '{existing}' \
                 without an acknowledged co-write"
            ),
            Self::CyclicDependency(id) => {
                write!(f, "dependency cycle through discovery '{id}'")
            }
            Self::UnknownDiscovery(id) => write!(f, "unknown discovery '{id}'"),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone)]
struct Entry {
    discovery: Discovery,
    /// Invocation whose verdict granted `Likely`. Promotion to `Verified`
    /// requires a runtime pass from a different invocation.
    likely_granted_by: Option<InvocationId>,
}

/// Registry of named, verified memory locations.
///
/// Reads take `&self`, writes take `&mut self`; for cross-thread sharing
/// wrap it in [`SharedCatalog`], which serializes writers behind a lock
/// so overlap checks always see a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCatalog {
    entries: BTreeMap<DiscoveryId, Entry>,
}

impl DiscoveryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new discovery.
    ///
    /// # Errors
    ///
    /// [`CatalogError::DuplicateId`] if the id exists;
    /// [`CatalogError::OverlapConflict`] if the range intersects a
    /// verified entry without an acknowledged co-write.
    pub fn register(&mut self, discovery: Discovery) -> Result<(), CatalogError> {
        if self.entries.contains_key(&discovery.id) {
            return Err(CatalogError::DuplicateId(discovery.id));
        }
        self.check_overlap(&discovery, |existing| {
            existing.confidence == Confidence::Verified
        })?;
        self.entries.insert(
            discovery.id.clone(),
            Entry { discovery, likely_granted_by: None },
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &DiscoveryId) -> Option<&Discovery> {
        self.entries.get(id).map(|e| &e.discovery)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Discovery> {
        self.entries.values().map(|e| &e.discovery)
    }

    /// Read-only filter over the registry.
    pub fn query<'a, P>(&'a self, predicate: P) -> Vec<&'a Discovery>
    where
        P: Fn(&Discovery) -> bool,
    {
        self.iter().filter(|d| predicate(d)).collect()
    }

    /// All discoveries in a category.
    #[must_use]
    pub fn by_category(&self, category: Category) -> Vec<&Discovery> {
        self.query(|d| d.category == category)
    }

    /// All discoveries at or above a confidence level.
    #[must_use]
    pub fn at_least(&self, confidence: Confidence) -> Vec<&Discovery> {
        self.query(|d| d.confidence >= confidence)
    }

    /// Order the requested ids so every discovery's dependencies within
    /// the set come before it. Dependencies outside the requested set
    /// impose no ordering (they are not being applied).
    ///
    /// # Errors
    ///
    /// [`CatalogError::UnknownDiscovery`] for an unregistered id;
    /// [`CatalogError::CyclicDependency`] if no order exists.
    pub fn resolve_dependency_order(
        &self,
        ids: &[DiscoveryId],
    ) -> Result<Vec<DiscoveryId>, CatalogError> {
        let requested: BTreeSet<&DiscoveryId> = ids.iter().collect();
        for id in ids {
            if !self.entries.contains_key(id) {
                return Err(CatalogError::UnknownDiscovery(id.clone()));
            }
        }

        let mut ordered = Vec::with_capacity(ids.len());
        let mut done: BTreeSet<&DiscoveryId> = BTreeSet::new();
        let mut in_progress: BTreeSet<&DiscoveryId> = BTreeSet::new();

        // Depth-first post-order; the in-progress set detects cycles.
        for id in ids {
            self.visit(id, &requested, &mut done, &mut in_progress, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        id: &'a DiscoveryId,
        requested: &BTreeSet<&DiscoveryId>,
        done: &mut BTreeSet<&'a DiscoveryId>,
        in_progress: &mut BTreeSet<&'a DiscoveryId>,
        ordered: &mut Vec<DiscoveryId>,
    ) -> Result<(), CatalogError> {
        if done.contains(id) {
            return Ok(());
        }
        if !in_progress.insert(id) {
            return Err(CatalogError::CyclicDependency(id.clone()));
        }
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CatalogError::UnknownDiscovery(id.clone()))?;
        for dep in &entry.discovery.dependencies {
            if requested.contains(dep) {
                self.visit(dep, requested, done, in_progress, ordered)?;
            }
        }
        in_progress.remove(id);
        done.insert(id);
        ordered.push(id.clone());
        Ok(())
    }

    /// Run the confidence state machine against a validation verdict.
    ///
    /// - Any failing stage demotes to `Unverified`.
    /// - `Unverified → Likely` on a passing binary+structural pair.
    /// - `Likely → Verified` only on an additional runtime pass from an
    ///   independent invocation, and only if promotion would not create
    ///   an unacknowledged overlap between verified entries.
    /// - Unconfirmed runtime outcomes leave confidence untouched.
    ///
    /// Returns the confidence after the update.
    ///
    /// # Errors
    ///
    /// [`CatalogError::UnknownDiscovery`] for an unregistered id;
    /// [`CatalogError::OverlapConflict`] if promotion is blocked.
    pub fn update_confidence(
        &mut self,
        id: &DiscoveryId,
        verdict: &ValidationVerdict,
    ) -> Result<Confidence, CatalogError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CatalogError::UnknownDiscovery(id.clone()))?;
        let current = entry.discovery.confidence;
        let likely_granted_by = entry.likely_granted_by;
        let discovery = entry.discovery.clone();

        if verdict.any_failed() {
            let entry = self.entry_mut(id)?;
            entry.discovery.confidence = Confidence::Unverified;
            entry.likely_granted_by = None;
            return Ok(Confidence::Unverified);
        }
        if !verdict.deterministic_pass() {
            return Ok(current);
        }

        match current {
            Confidence::Unverified => {
                let entry = self.entry_mut(id)?;
                entry.discovery.confidence = Confidence::Likely;
                entry.likely_granted_by = Some(verdict.invocation);
                Ok(Confidence::Likely)
            }
            Confidence::Likely => {
                let independent = likely_granted_by != Some(verdict.invocation);
                if verdict.runtime.is_pass() && independent {
                    self.check_overlap(&discovery, |existing| {
                        existing.confidence == Confidence::Verified
                    })?;
                    self.entry_mut(id)?.discovery.confidence = Confidence::Verified;
                    Ok(Confidence::Verified)
                } else {
                    Ok(Confidence::Likely)
                }
            }
            Confidence::Verified => Ok(Confidence::Verified),
        }
    }

    fn entry_mut(&mut self, id: &DiscoveryId) -> Result<&mut Entry, CatalogError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownDiscovery(id.clone()))
    }

    /// Fail if `discovery` overlaps any *other* entry matched by
    /// `concerns` without an acknowledged co-write on either side.
    fn check_overlap<F>(&self, discovery: &Discovery, concerns: F) -> Result<(), CatalogError>
    where
        F: Fn(&Discovery) -> bool,
    {
        if discovery.acknowledged_overlap {
            return Ok(());
        }
        for existing in self.iter() {
            if existing.id == discovery.id || existing.acknowledged_overlap {
                continue;
            }
            if concerns(existing) && discovery.overlaps(existing) {
                return Err(CatalogError::OverlapConflict {
                    id: discovery.id.clone(),
                    existing: existing.id.clone(),
                    offset: discovery.offset,
                });
            }
        }
        Ok(())
    }
}

/// Catalog behind `Arc<RwLock>`: many concurrent readers, writers
/// serialized so conflict detection sees a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<RwLock<DiscoveryCatalog>>,
}

impl SharedCatalog {
    #[must_use]
    pub fn new(catalog: DiscoveryCatalog) -> Self {
        Self { inner: Arc::new(RwLock::new(catalog)) }
    }

    /// Shared read access. A poisoned lock still yields the data: the
    /// catalog's invariants hold across every public mutation.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, DiscoveryCatalog> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive write access.
    #[must_use]
    pub fn write(&self) -> RwLockWriteGuard<'_, DiscoveryCatalog> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
