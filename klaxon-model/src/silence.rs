use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::ids::SilenceId;

/// How a single matcher compares a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum MatcherType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatcherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherType::Equal => "equal",
            MatcherType::NotEqual => "not-equal",
            MatcherType::Regex => "regex",
            MatcherType::NotRegex => "not-regex",
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, MatcherType::Regex | MatcherType::NotRegex)
    }
}

/// One label predicate inside a silence or inhibition rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matcher {
    pub name: String,
    pub value: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub match_type: MatcherType,
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatcherType::Equal,
        }
    }

    pub fn regex(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatcherType::Regex,
        }
    }
}

/// Lifecycle status, derivable from the clock and the silence window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SilenceStatus {
    Pending,
    Active,
    Expired,
}

impl SilenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SilenceStatus::Pending => "pending",
            SilenceStatus::Active => "active",
            SilenceStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for SilenceStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SilenceStatus::Pending),
            "active" => Ok(SilenceStatus::Active),
            "expired" => Ok(SilenceStatus::Expired),
            other => Err(ModelError::InvalidSilence(format!(
                "unrecognized silence status {other:?}"
            ))),
        }
    }
}

/// A declarative suppression rule over an interval.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Silence {
    pub id: SilenceId,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
    pub status: SilenceStatus,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token; updates must present the stored value.
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    /// Status as derived from the window, ignoring the stored column.
    pub fn status_at(&self, now: DateTime<Utc>) -> SilenceStatus {
        if now < self.starts_at {
            SilenceStatus::Pending
        } else if now < self.ends_at {
            SilenceStatus::Active
        } else {
            SilenceStatus::Expired
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SilenceStatus::Active
            && self.starts_at <= now
            && now < self.ends_at
    }

    pub fn validate(&self) -> Result<()> {
        if self.ends_at <= self.starts_at {
            return Err(ModelError::InvalidSilence(format!(
                "ends_at {} must follow starts_at {}",
                self.ends_at, self.starts_at
            )));
        }
        if self.matchers.is_empty() {
            return Err(ModelError::InvalidSilence(
                "silence requires at least one matcher".into(),
            ));
        }
        for matcher in &self.matchers {
            if matcher.name.trim().is_empty() {
                return Err(ModelError::InvalidSilence(
                    "matcher name must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}
