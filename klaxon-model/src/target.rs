use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::ModelError;
use crate::labels::LabelSet;

/// Sink family a target belongs to; drives payload shaping and ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TargetType {
    Chat,
    Paging,
    Email,
    Webhook,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Chat => "chat",
            TargetType::Paging => "paging",
            TargetType::Email => "email",
            TargetType::Webhook => "webhook",
        }
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TargetType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(TargetType::Chat),
            "paging" => Ok(TargetType::Paging),
            "email" => Ok(TargetType::Email),
            "webhook" => Ok(TargetType::Webhook),
            other => Err(ModelError::InvalidLabel(format!(
                "unsupported target type {other:?}"
            ))),
        }
    }
}

/// Opaque sink credential. Debug output never reveals the secret.
#[derive(Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(***)")
    }
}

/// A discovered dispatch destination.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Target {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub target_type: TargetType,
    pub endpoint: Url,
    pub credentials: Credentials,
    #[cfg_attr(feature = "serde", serde(default))]
    pub labels: LabelSet,
}

/// Reachability verdict maintained by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TargetHealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl TargetHealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetHealthState::Healthy => "healthy",
            TargetHealthState::Degraded => "degraded",
            TargetHealthState::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, TargetHealthState::Healthy)
    }
}

impl Display for TargetHealthState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rolling health bookkeeping for one target.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetHealth {
    pub state: TargetHealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl Default for TargetHealth {
    fn default() -> Self {
        Self {
            state: TargetHealthState::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("super-secret-token");
        assert_eq!(format!("{creds:?}"), "Credentials(***)");
    }

    #[test]
    fn target_type_round_trips() {
        for ty in ["chat", "paging", "email", "webhook"] {
            let parsed: TargetType = ty.parse().expect("valid type");
            assert_eq!(parsed.as_str(), ty);
        }
        assert!("carrier-pigeon".parse::<TargetType>().is_err());
    }
}
