//! Validation verdict types consumed by the confidence state machine.
//!
//! The full report (diff list, fingerprints, score) lives with the
//! pipeline; the catalog only needs the per-stage outcomes and which
//! pipeline invocation produced them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one run of the validation pipeline. Promotion to
/// `Verified` requires evidence from two distinct invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub u64);

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a single validation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Pass,
    /// Hard failure: the patch is wrong or the engine corrupted the image.
    Fail(String),
    /// The stage could not run to completion (timeout, flaky process).
    /// Distinct from `Fail`: leaves confidence untouched.
    Unconfirmed(String),
    /// An earlier stage failed before this one ran.
    Skipped,
}

impl StageOutcome {
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }
}

/// The per-stage outcomes of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub invocation: InvocationId,
    pub binary: StageOutcome,
    pub structural: StageOutcome,
    pub runtime: StageOutcome,
}

impl ValidationVerdict {
    /// Whether any stage failed outright (not merely unconfirmed).
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.binary.is_fail() || self.structural.is_fail() || self.runtime.is_fail()
    }

    /// Whether both deterministic stages passed.
    #[must_use]
    pub fn deterministic_pass(&self) -> bool {
        self.binary.is_pass() && self.structural.is_pass()
    }
}
