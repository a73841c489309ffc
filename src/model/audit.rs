//! The [`AuditReport`] record (§3, §4.10): per-feature completion status
//! produced at the start and end of every Architect Loop iteration.

use serde::{Deserialize, Serialize};

/// Completion status of a single specified feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeatureStatus {
    /// Fully implemented and verified.
    Complete,
    /// Some but not all acceptance criteria are met.
    Partial,
    /// No evidence of implementation found.
    Missing,
}

/// A single gap between the specification and the current repository state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Identifier of the feature this gap concerns.
    pub feature_id: String,
    /// What's missing or incomplete.
    pub description: String,
    /// A suggested next action (fed into `render_gap_request`, §4.10).
    pub suggested_action: String,
}

/// Per-feature status report produced by `audit(repo, spec)` (§4.10).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Status per feature id.
    pub statuses: std::collections::BTreeMap<String, FeatureStatus>,
    /// Evidence string per feature id, supporting the status.
    pub evidence: std::collections::BTreeMap<String, String>,
    /// Gaps to resolve, one per non-`Complete` feature.
    pub gaps: Vec<Gap>,
}

impl AuditReport {
    /// Fraction of features that are `Complete`, in `[0.0, 1.0]`. An empty
    /// report (no features declared) is vacuously complete.
    #[must_use]
    pub fn completion_ratio(&self) -> f64 {
        if self.statuses.is_empty() {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let complete = self
            .statuses
            .values()
            .filter(|s| matches!(s, FeatureStatus::Complete))
            .count() as f64;
        #[allow(clippy::cast_precision_loss)]
        let total = self.statuses.len() as f64;
        complete / total
    }

    /// Whether every feature is `Complete` (§4.10 `gaps empty`).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
            && self
                .statuses
                .values()
                .all(|s| matches!(s, FeatureStatus::Complete))
    }
}
