//! Runtime observation contract.
//!
//! The runtime stage delegates to an injected collaborator that boots
//! the patched ROM in an external emulator and samples named addresses.
//! Implementing that collaborator is out of scope here; this module
//! defines the contract: `run_and_observe(rom, spec) -> ObservedValues`,
//! plus the timeout/process error split the pipeline relies on. It is
//! the only non-deterministic part of validation and may be slow or
//! unavailable.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use snes_rom::CpuAddress;

/// When to sample during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationTrigger {
    /// Sample after the machine has run this many frames.
    AfterFrames(u32),
    /// Sample when a named event fires (observer-defined vocabulary,
    /// e.g. "title-screen", "first-input").
    OnEvent(String),
}

/// A value sampled from the running machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedValue {
    Byte(u8),
    Word(u16),
}

impl fmt::Display for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "${v:02X}"),
            Self::Word(v) => write!(f, "${v:04X}"),
        }
    }
}

/// One address to sample, with an optional expected value.
///
/// Points without an expectation are informational: they appear in the
/// observed set but never fail the stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationPoint {
    pub name: String,
    pub address: CpuAddress,
    pub expected: Option<ObservedValue>,
}

impl ObservationPoint {
    #[must_use]
    pub fn new(name: &str, address: CpuAddress) -> Self {
        Self { name: name.to_string(), address, expected: None }
    }

    #[must_use]
    pub fn expecting(mut self, value: ObservedValue) -> Self {
        self.expected = Some(value);
        self
    }
}

/// What to observe and for how long to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationSpec {
    pub points: Vec<ObservationPoint>,
    pub trigger: ObservationTrigger,
    /// Caller-supplied wall-clock budget for the whole run.
    pub timeout: Duration,
}

/// Sampled values keyed by observation-point name.
pub type ObservedValues = BTreeMap<String, ObservedValue>;

/// Runtime collaborator failure. Both variants are soft: the stage
/// reports `Unconfirmed`, never `Fail`, and confidence is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The run exceeded the caller's budget.
    Timeout { after: Duration },
    /// The external process failed to spawn or crashed. Often transient;
    /// the pipeline retries these with backoff.
    Process(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after } => write!(f, "runtime observation timed out after {after:?}"),
            Self::Process(msg) => write!(f, "runtime process error: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The injected external capability that runs a ROM and samples state.
pub trait RuntimeObserver {
    /// Boot `rom`, run until the spec's trigger, and sample every point.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Timeout`] when the budget elapses,
    /// [`RuntimeError::Process`] when the host process fails.
    fn run_and_observe(
        &self,
        rom: &[u8],
        spec: &ObservationSpec,
    ) -> Result<ObservedValues, RuntimeError>;
}
