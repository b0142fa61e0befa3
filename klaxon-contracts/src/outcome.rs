//! Per-alert pipeline outcomes reported back to the ingress layer.

use serde::{Deserialize, Serialize};

use klaxon_model::{Fingerprint, GroupKey, Severity, SilenceId};

/// What the pipeline did with a single alert.
///
/// Optional stages that degraded to fallback leave their field `None`;
/// suppression fields name the suppressor so the ingress can report it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub fingerprint: Option<Fingerprint>,
    pub stored: bool,
    pub deduplicated: bool,
    pub occurrence_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inhibited_by: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silenced_by: Option<SilenceId>,
    /// Name of the filter rule that dropped the alert, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_into: Option<GroupKey>,
    /// Targets the surviving group flush was handed to. Publishing is
    /// asynchronous; at ingest time this is almost always empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub published_to: Vec<String>,
    /// Set when processing stopped because the caller cancelled. Not an
    /// error: partial work up to the cancelled stage is reported as usual.
    #[serde(default)]
    pub cancelled: bool,
}

impl AlertOutcome {
    pub fn suppressed(&self) -> bool {
        self.inhibited_by.is_some()
            || self.silenced_by.is_some()
            || self.dropped.is_some()
    }
}

/// Batch-level summary: one outcome per inbound alert, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<AlertOutcome>,
}

impl BatchOutcome {
    pub fn stored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.stored).count()
    }

    pub fn suppressed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.suppressed()).count()
    }
}
