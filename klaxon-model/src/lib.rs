//! Core data model definitions shared across Klaxon crates.
#![allow(missing_docs)]

pub mod alert;
pub mod classification;
pub mod error;
pub mod ids;
pub mod inhibition;
pub mod labels;
pub mod prelude;
pub mod priority;
pub mod severity;
pub mod silence;
pub mod target;

// Intentionally curated re-exports for downstream consumers.
pub use alert::{Alert, AlertStatus, AlertTransition, HistoryEntry, StoredAlert};
pub use classification::{Category, CategoryKind, ClassificationResult};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{Fingerprint, GroupKey, JobId, SilenceId};
pub use inhibition::InhibitionRule;
pub use labels::LabelSet;
pub use priority::Priority;
pub use severity::Severity;
pub use silence::{Matcher, MatcherType, Silence, SilenceStatus};
pub use target::{Credentials, Target, TargetHealth, TargetHealthState, TargetType};
