//! Validation pipeline scenarios: stage outcomes, confidence feedback
//! into the catalog, and runtime observer failure modes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use snes_catalog::{
    Category, Confidence, Discovery, DiscoveryCatalog, DiscoveryId, StageOutcome, ValueSize,
};
use snes_patcher::{
    validate_candidates, ObservationPoint, ObservationSpec, ObservationTrigger, ObservedValue,
    ObservedValues, PatchEngine, PatchValue, PipelineConfig, RuntimeError, RuntimeObserver,
    ValidationPipeline,
};
use snes_rom::{checksum, mapping, CpuAddress, FileOffset, MappingMode, RomImage};

const HEARTS_OFFSET: u32 = 0x2_74F4;

fn lorom_image() -> RomImage {
    let mut rom = vec![0u8; 0x10_0000];
    let base = MappingMode::LoRom.header_offset();
    rom[base..base + 21].copy_from_slice(b"PIPELINE TEST        ");
    rom[base + 0x15] = 0x20;
    rom[base + 0x17] = 0x0A;
    rom[base + 0x19] = 0x01;
    checksum::write_checksum(&mut rom, MappingMode::LoRom).expect("header fits");
    RomImage::from_bytes(rom, MappingMode::LoRom).expect("valid image")
}

fn hearts_catalog() -> DiscoveryCatalog {
    let mut catalog = DiscoveryCatalog::new();
    catalog
        .register(Discovery::new(
            "hearts",
            Category::Memory,
            FileOffset(HEARTS_OFFSET),
            MappingMode::LoRom,
            ValueSize::One,
        ))
        .expect("register");
    catalog
}

fn hearts_spec() -> ObservationSpec {
    let address = mapping::to_cpu_address(FileOffset(HEARTS_OFFSET), MappingMode::LoRom)
        .expect("resolves");
    ObservationSpec {
        points: vec![ObservationPoint::new("hearts", address)
            .expecting(ObservedValue::Byte(0xE7))],
        trigger: ObservationTrigger::AfterFrames(60),
        timeout: Duration::from_secs(5),
    }
}

/// Observer that always times out, as if the emulator hung.
struct HungObserver;

impl RuntimeObserver for HungObserver {
    fn run_and_observe(
        &self,
        _rom: &[u8],
        spec: &ObservationSpec,
    ) -> Result<ObservedValues, RuntimeError> {
        Err(RuntimeError::Timeout { after: spec.timeout })
    }
}

/// Observer that reports the expected value, as a healthy emulator would.
struct AgreeingObserver;

impl RuntimeObserver for AgreeingObserver {
    fn run_and_observe(
        &self,
        _rom: &[u8],
        _spec: &ObservationSpec,
    ) -> Result<ObservedValues, RuntimeError> {
        let mut observed = ObservedValues::new();
        observed.insert("hearts".to_string(), ObservedValue::Byte(0xE7));
        Ok(observed)
    }
}

/// Observer that contradicts the expectation.
struct DisagreeingObserver;

impl RuntimeObserver for DisagreeingObserver {
    fn run_and_observe(
        &self,
        _rom: &[u8],
        _spec: &ObservationSpec,
    ) -> Result<ObservedValues, RuntimeError> {
        let mut observed = ObservedValues::new();
        observed.insert("hearts".to_string(), ObservedValue::Byte(0x00));
        Ok(observed)
    }
}

/// Observer whose process crashes a fixed number of times before
/// answering, to exercise the retry-with-backoff path.
struct FlakyObserver {
    failures_left: AtomicU32,
}

impl RuntimeObserver for FlakyObserver {
    fn run_and_observe(
        &self,
        rom: &[u8],
        spec: &ObservationSpec,
    ) -> Result<ObservedValues, RuntimeError> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(RuntimeError::Process("spawn failed".into()));
        }
        AgreeingObserver.run_and_observe(rom, spec)
    }
}

fn patch_hearts(image: &RomImage, catalog: &DiscoveryCatalog) -> snes_patcher::PatchedImage {
    PatchEngine::new(catalog)
        .apply_patch(image, &"hearts".into(), &PatchValue::Int(0xE7))
        .expect("applies")
}

#[test]
fn clean_patch_passes_deterministic_stages() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);

    let pipeline = ValidationPipeline::new(PipelineConfig::default());
    let report = pipeline.validate(&image, &patched, None);

    assert_eq!(report.binary, StageOutcome::Pass);
    assert_eq!(report.structural, StageOutcome::Pass);
    assert!(matches!(report.runtime, StageOutcome::Unconfirmed(_)));
    assert!(report.passed);
    // Diff list: the patched byte plus the checksum repair
    assert!(report.diffs.iter().any(|d| d.offset == HEARTS_OFFSET));
    assert!(report.diffs.iter().all(|d| {
        d.offset == HEARTS_OFFSET || (0x7FDC..0x7FE0).contains(&d.offset)
    }));
    assert_ne!(report.original_sha1, report.patched_sha1);
}

#[test]
fn runtime_timeout_is_unconfirmed_not_failed() {
    // Scenario: the emulator collaborator times out
    let image = lorom_image();
    let mut catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);

    let observer = HungObserver;
    let pipeline = ValidationPipeline::new(PipelineConfig::default()).with_observer(&observer);
    let report = pipeline.validate(&image, &patched, Some(&hearts_spec()));

    assert!(matches!(report.runtime, StageOutcome::Unconfirmed(_)));
    assert!(report.passed);
    assert!(!report.meets_verified_threshold);

    // Confidence moves to Likely on the deterministic passes but can
    // never reach Verified from an unconfirmed runtime stage
    let id: DiscoveryId = "hearts".into();
    let after = catalog.update_confidence(&id, &report.verdict()).expect("known");
    assert_eq!(after, Confidence::Likely);
    let again = catalog.update_confidence(&id, &report.verdict()).expect("known");
    assert_eq!(again, Confidence::Likely);
}

#[test]
fn two_independent_passing_runs_reach_verified() {
    let image = lorom_image();
    let mut catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);
    let id: DiscoveryId = "hearts".into();

    let observer = AgreeingObserver;
    let pipeline = ValidationPipeline::new(PipelineConfig::default()).with_observer(&observer);

    let first = pipeline.validate(&image, &patched, Some(&hearts_spec()));
    assert_eq!(first.runtime, StageOutcome::Pass);
    assert!(first.meets_verified_threshold);
    assert_eq!(
        catalog.update_confidence(&id, &first.verdict()).expect("known"),
        Confidence::Likely
    );

    let second = pipeline.validate(&image, &patched, Some(&hearts_spec()));
    assert_ne!(first.invocation, second.invocation);
    assert_eq!(
        catalog.update_confidence(&id, &second.verdict()).expect("known"),
        Confidence::Verified
    );
}

#[test]
fn contradicting_runtime_observation_fails_and_demotes() {
    let image = lorom_image();
    let mut catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);
    let id: DiscoveryId = "hearts".into();

    let observer = DisagreeingObserver;
    let pipeline = ValidationPipeline::new(PipelineConfig::default()).with_observer(&observer);
    let report = pipeline.validate(&image, &patched, Some(&hearts_spec()));

    assert!(matches!(report.runtime, StageOutcome::Fail(_)));
    assert!(!report.passed);
    assert_eq!(
        catalog.update_confidence(&id, &report.verdict()).expect("known"),
        Confidence::Unverified
    );
}

#[test]
fn transient_process_failures_are_retried() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);

    let observer = FlakyObserver { failures_left: AtomicU32::new(2) };
    let config = PipelineConfig {
        runtime_retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let pipeline = ValidationPipeline::new(config).with_observer(&observer);
    let report = pipeline.validate(&image, &patched, Some(&hearts_spec()));
    assert_eq!(report.runtime, StageOutcome::Pass);
}

#[test]
fn exhausted_retries_leave_the_stage_unconfirmed() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);

    let observer = FlakyObserver { failures_left: AtomicU32::new(10) };
    let config = PipelineConfig {
        runtime_retries: 1,
        retry_backoff: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let pipeline = ValidationPipeline::new(config).with_observer(&observer);
    let report = pipeline.validate(&image, &patched, Some(&hearts_spec()));
    assert!(matches!(report.runtime, StageOutcome::Unconfirmed(_)));
    assert!(report.passed);
}

#[test]
fn stray_byte_changes_fail_the_binary_stage() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let mut patched = patch_hearts(&image, &catalog);

    // Corrupt a byte the patch never claimed
    patched.image.bytes_mut()[0x9000] ^= 0xFF;

    let pipeline = ValidationPipeline::new(PipelineConfig::default());
    let report = pipeline.validate(&image, &patched, None);
    assert!(matches!(report.binary, StageOutcome::Fail(_)));
    assert_eq!(report.structural, StageOutcome::Skipped);
    assert_eq!(report.runtime, StageOutcome::Skipped);
    assert!(!report.passed);
    assert!((report.score - 0.0).abs() < f64::EPSILON);
}

#[test]
fn size_code_edit_fails_the_structural_stage() {
    // A patch that legitimately targets the header's size-code byte
    // clears the binary stage (the span is intended) but leaves the
    // declared size disagreeing with the buffer
    let image = lorom_image();
    let mut catalog = DiscoveryCatalog::new();
    catalog
        .register(Discovery::new(
            "size-code",
            Category::Memory,
            FileOffset(MappingMode::LoRom.header_offset() as u32 + 0x17),
            MappingMode::LoRom,
            ValueSize::One,
        ))
        .expect("register");

    let patched = PatchEngine::new(&catalog)
        .apply_patch(&image, &"size-code".into(), &PatchValue::Int(0x0B))
        .expect("applies");

    let pipeline = ValidationPipeline::new(PipelineConfig::default());
    let report = pipeline.validate(&image, &patched, None);
    assert_eq!(report.binary, StageOutcome::Pass);
    assert!(matches!(report.structural, StageOutcome::Fail(_)));
    assert_eq!(report.runtime, StageOutcome::Skipped);
    assert!(!report.passed);
}

#[test]
fn candidate_variants_validate_in_parallel() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let engine = PatchEngine::new(&catalog);

    let candidates: Vec<_> = [0x01u64, 0x7F, 0xE7]
        .iter()
        .map(|&value| {
            engine
                .apply_patch(&image, &"hearts".into(), &PatchValue::Int(value))
                .expect("applies")
        })
        .collect();

    let reports = validate_candidates(&PipelineConfig::default(), &image, &candidates);
    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report.binary, StageOutcome::Pass);
        assert_eq!(report.structural, StageOutcome::Pass);
        assert!(matches!(report.runtime, StageOutcome::Unconfirmed(_)));
    }
}

#[test]
fn observation_points_without_expectations_never_fail() {
    let image = lorom_image();
    let catalog = hearts_catalog();
    let patched = patch_hearts(&image, &catalog);

    let spec = ObservationSpec {
        points: vec![ObservationPoint::new(
            "scratch",
            CpuAddress { bank: 0x7E, addr: 0x0100 },
        )],
        trigger: ObservationTrigger::OnEvent("title-screen".into()),
        timeout: Duration::from_secs(1),
    };
    // Observer samples nothing the spec expects a value for
    let observer = DisagreeingObserver;
    let pipeline = ValidationPipeline::new(PipelineConfig::default()).with_observer(&observer);
    let report = pipeline.validate(&image, &patched, Some(&spec));
    assert_eq!(report.runtime, StageOutcome::Pass);
}
