use std::fmt::{self, Display, Formatter};

use crate::severity::Severity;

/// Coarse classification bucket plus the classifier's raw wording.
///
/// The tag is what routing logic switches on; `raw` preserves whatever free
/// text the model produced for operators to read.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Category {
    pub kind: CategoryKind,
    pub raw: String,
}

impl Category {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let kind = CategoryKind::from_raw(&raw);
        Self { kind, raw }
    }

    pub fn unknown() -> Self {
        Self {
            kind: CategoryKind::Other,
            raw: String::new(),
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "{}", self.kind.as_str())
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CategoryKind {
    Infrastructure,
    Application,
    Network,
    Database,
    Security,
    Capacity,
    Other,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Infrastructure => "infrastructure",
            CategoryKind::Application => "application",
            CategoryKind::Network => "network",
            CategoryKind::Database => "database",
            CategoryKind::Security => "security",
            CategoryKind::Capacity => "capacity",
            CategoryKind::Other => "other",
        }
    }

    fn from_raw(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            s if s.contains("infra") || s.contains("host") || s.contains("node") => {
                CategoryKind::Infrastructure
            }
            s if s.contains("app") || s.contains("service") => {
                CategoryKind::Application
            }
            s if s.contains("net") || s.contains("dns") || s.contains("lb") => {
                CategoryKind::Network
            }
            s if s.contains("db") || s.contains("database") || s.contains("sql") => {
                CategoryKind::Database
            }
            s if s.contains("sec") || s.contains("auth") => CategoryKind::Security,
            s if s.contains("capacity")
                || s.contains("disk")
                || s.contains("quota") =>
            {
                CategoryKind::Capacity
            }
            _ => CategoryKind::Other,
        }
    }
}

/// Outcome of severity/category inference for one fingerprint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassificationResult {
    pub severity: Severity,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    pub category: Category,
    pub processing_time_s: f64,
    /// True when this result was synthesized locally instead of classified.
    #[cfg_attr(feature = "serde", serde(default))]
    pub fallback: bool,
}

impl ClassificationResult {
    /// Clamp confidence into its documented range.
    pub fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_tags_common_buckets() {
        assert_eq!(
            Category::parse("database connection pool").kind,
            CategoryKind::Database
        );
        assert_eq!(Category::parse("Networking").kind, CategoryKind::Network);
        assert_eq!(Category::parse("mystery").kind, CategoryKind::Other);
    }

    #[test]
    fn normalized_clamps_confidence() {
        let result = ClassificationResult {
            severity: Severity::Warning,
            confidence: 1.7,
            reasoning: String::new(),
            recommendations: vec![],
            category: Category::unknown(),
            processing_time_s: 0.0,
            fallback: false,
        };
        assert_eq!(result.normalized().confidence, 1.0);
    }
}
