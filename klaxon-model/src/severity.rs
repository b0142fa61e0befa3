use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    Noise = 0,
    Info = 1,
    Warning = 2,
    Critical = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Noise => "noise",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse for label hints (`severity=sev1`, `priority=P1`, ...).
    ///
    /// Returns `None` when the hint carries no recognizable severity so the
    /// caller can fall through to its own default.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" | "sev1" | "p1" | "page" | "emergency" => {
                Some(Severity::Critical)
            }
            "warning" | "warn" | "sev2" | "p2" | "major" | "error" => {
                Some(Severity::Warning)
            }
            "info" | "sev3" | "p3" | "minor" | "notice" => Some(Severity::Info),
            "noise" | "none" | "debug" => Some(Severity::Noise),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = crate::error::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noise" => Ok(Severity::Noise),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(crate::error::ModelError::InvalidLabel(format!(
                "unrecognized severity {other:?}"
            ))),
        }
    }
}
