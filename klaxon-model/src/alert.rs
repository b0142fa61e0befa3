use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{ModelError, Result};
use crate::ids::Fingerprint;
use crate::labels::LabelSet;
use crate::severity::Severity;

/// Whether the producer considers the condition ongoing or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(ModelError::InvalidLabel(format!(
                "unrecognized alert status {other:?}"
            ))),
        }
    }
}

/// A normalized alert flowing through the pipeline.
///
/// `fingerprint` is a pure function of `labels`; constructors in the
/// contracts crate guarantee the two stay consistent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alert {
    pub fingerprint: Fingerprint,
    pub alert_name: String,
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub status: AlertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<Url>,
    /// Populated after classification; `None` until then.
    pub severity: Option<Severity>,
}

impl Alert {
    /// Enforces the firing/resolved timestamp invariant.
    pub fn validate(&self) -> Result<()> {
        if self.alert_name.trim().is_empty() {
            return Err(ModelError::InvalidLabel(
                "alert name must not be empty".into(),
            ));
        }
        if self.status.is_resolved() && self.ends_at.is_none() {
            return Err(ModelError::InvalidTimestamp(
                "resolved alert requires ends_at".into(),
            ));
        }
        if let Some(ends_at) = self.ends_at {
            if ends_at < self.starts_at {
                return Err(ModelError::InvalidTimestamp(format!(
                    "ends_at {ends_at} precedes starts_at {}",
                    self.starts_at
                )));
            }
        }
        Ok(())
    }
}

/// The persisted view of an alert: one row per fingerprint with counters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredAlert {
    pub alert: Alert,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// State transition recorded in the append-only alert history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AlertTransition {
    Created,
    Refired,
    Resolved,
    Classified,
}

impl AlertTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTransition::Created => "created",
            AlertTransition::Refired => "refired",
            AlertTransition::Resolved => "resolved",
            AlertTransition::Classified => "classified",
        }
    }
}

impl std::str::FromStr for AlertTransition {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(AlertTransition::Created),
            "refired" => Ok(AlertTransition::Refired),
            "resolved" => Ok(AlertTransition::Resolved),
            "classified" => Ok(AlertTransition::Classified),
            other => Err(ModelError::InvalidLabel(format!(
                "unrecognized alert transition {other:?}"
            ))),
        }
    }
}

/// One entry of the per-fingerprint history log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistoryEntry {
    pub fingerprint: Fingerprint,
    pub transition: AlertTransition,
    pub recorded_at: DateTime<Utc>,
    pub detail: Option<String>,
}
