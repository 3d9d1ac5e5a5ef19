//! Discovery catalog: named, verified ROM memory locations.
//!
//! A `Discovery` is a catalogued byte range with documented meaning and a
//! confidence level earned through validation. The catalog enforces the
//! registry invariants (unique ids, no unacknowledged overlap between
//! verified entries), orders batches by dependency, and runs the
//! confidence state machine off validation verdicts.

mod catalog;
mod discovery;
pub mod persist;
mod report;

pub use catalog::{CatalogError, DiscoveryCatalog, SharedCatalog};
pub use discovery::{Category, Confidence, Discovery, DiscoveryId, ValueEncoding, ValueSize};
pub use report::{InvocationId, StageOutcome, ValidationVerdict};
