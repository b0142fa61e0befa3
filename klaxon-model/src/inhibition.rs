use crate::silence::Matcher;

/// A rule by which a firing "source" alert hides matching "target" alerts.
///
/// The rule is *active* for a target when at least one firing alert matches
/// `source_matchers` and every label named in `equal` carries the same value
/// on both alerts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InhibitionRule {
    pub source_matchers: Vec<Matcher>,
    pub target_matchers: Vec<Matcher>,
    /// Label names that must agree between source and target.
    #[cfg_attr(feature = "serde", serde(default))]
    pub equal: Vec<String>,
}

impl InhibitionRule {
    pub fn new(
        source_matchers: Vec<Matcher>,
        target_matchers: Vec<Matcher>,
        equal: Vec<String>,
    ) -> Self {
        Self {
            source_matchers,
            target_matchers,
            equal,
        }
    }
}
