//! Patch engine and validation pipeline for SNES ROM images.
//!
//! The engine applies catalogued byte edits to a cloned image, repairs
//! the header checksum once after the last edit, and never exposes a
//! partially-patched buffer. The pipeline then proves the result correct
//! in three ordered stages (binary, structural, runtime) and produces a
//! confidence-bearing report the catalog consumes.

mod engine;
mod patch;
pub mod runtime;
mod validate;

pub use engine::{PatchEngine, PatchRequest, PatchedImage};
pub use patch::{Patch, PatchError, PatchValue};
pub use runtime::{
    ObservationPoint, ObservationSpec, ObservationTrigger, ObservedValue, ObservedValues,
    RuntimeError, RuntimeObserver,
};
pub use validate::{
    validate_candidates, ByteDiff, PipelineConfig, StageWeights, ValidationPipeline,
    ValidationReport,
};
