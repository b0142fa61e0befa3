//! Convenience re-exports for downstream crates.

pub use crate::alert::{Alert, AlertStatus, AlertTransition, HistoryEntry, StoredAlert};
pub use crate::classification::{Category, CategoryKind, ClassificationResult};
pub use crate::error::{ModelError, Result as ModelResult};
pub use crate::ids::{Fingerprint, GroupKey, JobId, SilenceId};
pub use crate::inhibition::InhibitionRule;
pub use crate::labels::LabelSet;
pub use crate::priority::Priority;
pub use crate::severity::Severity;
pub use crate::silence::{Matcher, MatcherType, Silence, SilenceStatus};
pub use crate::target::{
    Credentials, Target, TargetHealth, TargetHealthState, TargetType,
};
