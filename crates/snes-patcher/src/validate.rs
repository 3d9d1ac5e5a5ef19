//! Three-stage validation pipeline: binary, structural, runtime.
//!
//! Stages run in order and short-circuit on the first hard failure.
//! Binary and structural are deterministic and never retried; the
//! runtime stage drives an external observer, may be retried on
//! transient process errors, and reports `Unconfirmed` (never `Fail`)
//! when the collaborator cannot answer.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use sha1::{Digest, Sha1};

use snes_catalog::{InvocationId, StageOutcome, ValidationVerdict};
use snes_rom::header::{checksum_offset, complement_offset};
use snes_rom::{checksum, MappingMode, RomImage};

use crate::engine::PatchedImage;
use crate::patch::Patch;
use crate::runtime::{ObservationSpec, ObservedValues, RuntimeError, RuntimeObserver};

static NEXT_INVOCATION: AtomicU64 = AtomicU64::new(1);

fn next_invocation() -> InvocationId {
    InvocationId(NEXT_INVOCATION.fetch_add(1, Ordering::Relaxed))
}

/// Relative weight of each stage in the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWeights {
    pub binary: f64,
    pub structural: f64,
    pub runtime: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self { binary: 0.40, structural: 0.35, runtime: 0.25 }
    }
}

impl StageWeights {
    fn total(self) -> f64 {
        self.binary + self.structural + self.runtime
    }
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub weights: StageWeights,
    /// Extra attempts for transient runtime process failures.
    pub runtime_retries: u32,
    /// Base delay between runtime retries; grows linearly per attempt.
    pub retry_backoff: Duration,
    /// Aggregate score a report must reach to support promotion.
    pub verified_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weights: StageWeights::default(),
            runtime_retries: 2,
            retry_backoff: Duration::from_millis(250),
            verified_threshold: 0.9,
        }
    }
}

/// A single byte that differs between original and patched image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteDiff {
    pub offset: u32,
    pub before: u8,
    pub after: u8,
}

/// The pipeline's confidence-bearing output.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub invocation: InvocationId,
    pub binary: StageOutcome,
    pub structural: StageOutcome,
    pub runtime: StageOutcome,
    /// Every byte that changed, including the checksum repair.
    pub diffs: Vec<ByteDiff>,
    pub original_sha1: String,
    pub patched_sha1: String,
    /// Weighted aggregate in `[0, 1]`; only `Pass` contributes.
    pub score: f64,
    /// No stage failed hard. Unconfirmed stages do not clear this.
    pub passed: bool,
    /// Whether `score` reached the configured promotion threshold.
    pub meets_verified_threshold: bool,
}

impl ValidationReport {
    /// The slice of the report the catalog's state machine consumes.
    #[must_use]
    pub fn verdict(&self) -> ValidationVerdict {
        ValidationVerdict {
            invocation: self.invocation,
            binary: self.binary.clone(),
            structural: self.structural.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

/// The three-stage verifier.
pub struct ValidationPipeline<'obs> {
    config: PipelineConfig,
    observer: Option<&'obs dyn RuntimeObserver>,
}

impl<'obs> ValidationPipeline<'obs> {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, observer: None }
    }

    /// Inject the external runtime collaborator.
    #[must_use]
    pub fn with_observer(mut self, observer: &'obs dyn RuntimeObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run all stages against a patch result.
    ///
    /// `observation` drives the runtime stage; without it (or without an
    /// injected observer) that stage reports `Unconfirmed`.
    #[must_use]
    pub fn validate(
        &self,
        original: &RomImage,
        patched: &PatchedImage,
        observation: Option<&ObservationSpec>,
    ) -> ValidationReport {
        let invocation = next_invocation();
        let (binary, diffs) = binary_stage(original, patched);

        let structural = if binary.is_fail() {
            StageOutcome::Skipped
        } else {
            structural_stage(original, patched)
        };

        let runtime = if binary.is_fail() || structural.is_fail() {
            StageOutcome::Skipped
        } else {
            self.runtime_stage(patched.image.bytes(), observation)
        };

        let weights = self.config.weights;
        let total = weights.total();
        let earned = [
            (&binary, weights.binary),
            (&structural, weights.structural),
            (&runtime, weights.runtime),
        ]
        .iter()
        .filter(|(outcome, _)| outcome.is_pass())
        .map(|(_, weight)| weight)
        .sum::<f64>();
        let score = if total > 0.0 { earned / total } else { 0.0 };
        let passed = !binary.is_fail() && !structural.is_fail() && !runtime.is_fail();

        ValidationReport {
            invocation,
            binary,
            structural,
            runtime,
            diffs,
            original_sha1: sha1_hex(original.bytes()),
            patched_sha1: sha1_hex(patched.image.bytes()),
            score,
            passed,
            meets_verified_threshold: score >= self.config.verified_threshold,
        }
    }

    fn runtime_stage(
        &self,
        rom: &[u8],
        observation: Option<&ObservationSpec>,
    ) -> StageOutcome {
        let Some(observer) = self.observer else {
            return StageOutcome::Unconfirmed("no runtime observer injected".into());
        };
        let Some(spec) = observation else {
            return StageOutcome::Unconfirmed("no observation spec supplied".into());
        };

        let mut attempt = 0u32;
        loop {
            match observer.run_and_observe(rom, spec) {
                Ok(observed) => return compare_observations(spec, &observed),
                Err(RuntimeError::Timeout { after }) => {
                    return StageOutcome::Unconfirmed(format!(
                        "runtime observation timed out after {after:?}"
                    ));
                }
                Err(RuntimeError::Process(msg)) => {
                    if attempt >= self.config.runtime_retries {
                        return StageOutcome::Unconfirmed(format!(
                            "runtime process failed after {} attempt(s): {msg}",
                            attempt + 1
                        ));
                    }
                    attempt += 1;
                    thread::sleep(self.config.retry_backoff * attempt);
                }
            }
        }
    }
}

/// Stage 1: the diff between original and patched must be exactly the
/// intended spans plus the checksum repair, sizes must match, and the
/// stored checksum pair must verify.
fn binary_stage(original: &RomImage, patched: &PatchedImage) -> (StageOutcome, Vec<ByteDiff>) {
    let before = original.bytes();
    let after = patched.image.bytes();
    if before.len() != after.len() {
        let outcome = StageOutcome::Fail(format!(
            "image size changed: {} -> {} bytes",
            before.len(),
            after.len()
        ));
        return (outcome, Vec::new());
    }

    let diffs: Vec<ByteDiff> = before
        .iter()
        .zip(after)
        .enumerate()
        .filter(|(_, (b, a))| b != a)
        .map(|(offset, (&before, &after))| ByteDiff { offset: offset as u32, before, after })
        .collect();

    let mode = patched.image.mapping_mode();
    let mut expected: BTreeSet<u32> = patched.patches.iter().flat_map(Patch::span).collect();
    expected.extend(checksum_field_offsets(mode));

    for diff in &diffs {
        if !expected.contains(&diff.offset) {
            let outcome = StageOutcome::Fail(format!(
                "stray byte change at ${:06X}: ${:02X} -> ${:02X}",
                diff.offset, diff.before, diff.after
            ));
            return (outcome, diffs);
        }
    }

    match checksum::verify_checksum(after, mode) {
        Ok(true) => (StageOutcome::Pass, diffs),
        Ok(false) => (
            StageOutcome::Fail("stored checksum pair does not verify".into()),
            diffs,
        ),
        Err(err) => (StageOutcome::Fail(err.to_string()), diffs),
    }
}

fn checksum_field_offsets(mode: MappingMode) -> impl Iterator<Item = u32> {
    let comp = complement_offset(mode) as u32;
    let chk = checksum_offset(mode) as u32;
    [comp, comp + 1, chk, chk + 1].into_iter()
}

/// Stage 2: header fields must survive the patch unless the patch
/// explicitly targeted the header, and the declared size code must
/// match the actual buffer length.
fn structural_stage(original: &RomImage, patched: &PatchedImage) -> StageOutcome {
    let mode = patched.image.mapping_mode();
    let before = original.header();
    let after = patched.image.header();

    if !patched.image.declared_size_matches() {
        return StageOutcome::Fail(format!(
            "declared ROM size code {:#04X} ({} bytes) does not match the {} byte buffer",
            after.rom_size_code,
            after.declared_rom_bytes(),
            patched.image.len()
        ));
    }

    let header_targeted = patched.patches.iter().any(|p| p.targets_header(mode));
    if !header_targeted {
        if before.map_mode != after.map_mode {
            return StageOutcome::Fail(format!(
                "map mode byte changed: {:#04X} -> {:#04X}",
                before.map_mode, after.map_mode
            ));
        }
        if before.rom_size_code != after.rom_size_code {
            return StageOutcome::Fail(format!(
                "ROM size code changed: {:#04X} -> {:#04X}",
                before.rom_size_code, after.rom_size_code
            ));
        }
        if before.region != after.region {
            return StageOutcome::Fail(format!(
                "region code changed: {:#04X} -> {:#04X}",
                before.region, after.region
            ));
        }
    }
    StageOutcome::Pass
}

/// Stage 3 comparison: every expected value must be present and equal.
fn compare_observations(spec: &ObservationSpec, observed: &ObservedValues) -> StageOutcome {
    for point in &spec.points {
        let Some(expected) = point.expected else { continue };
        match observed.get(&point.name) {
            None => {
                return StageOutcome::Unconfirmed(format!(
                    "observer returned no sample for '{}'",
                    point.name
                ));
            }
            Some(actual) if *actual != expected => {
                return StageOutcome::Fail(format!(
                    "'{}' at {} observed {actual}, expected {expected}",
                    point.name, point.address
                ));
            }
            Some(_) => {}
        }
    }
    StageOutcome::Pass
}

fn sha1_hex(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Deterministic validation of several candidate images in parallel.
///
/// Candidates are independent (no shared mutable state), so they fan out
/// across the thread pool. The runtime stage is not attempted; each
/// report's runtime outcome is `Unconfirmed`.
#[must_use]
pub fn validate_candidates(
    config: &PipelineConfig,
    original: &RomImage,
    candidates: &[PatchedImage],
) -> Vec<ValidationReport> {
    candidates
        .par_iter()
        .map(|candidate| ValidationPipeline::new(config.clone()).validate(original, candidate, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_follow_the_40_35_25_split() {
        let weights = StageWeights::default();
        assert!((weights.binary - 0.40).abs() < f64::EPSILON);
        assert!((weights.structural - 0.35).abs() < f64::EPSILON);
        assert!((weights.runtime - 0.25).abs() < f64::EPSILON);
        assert!((weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sha1_hex_is_stable() {
        // Known digest of the empty input
        assert_eq!(sha1_hex(&[]), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn checksum_fields_are_part_of_the_expected_diff_set() {
        let offsets: Vec<u32> = checksum_field_offsets(MappingMode::LoRom).collect();
        assert_eq!(offsets, vec![0x7FDC, 0x7FDD, 0x7FDE, 0x7FDF]);
    }
}
