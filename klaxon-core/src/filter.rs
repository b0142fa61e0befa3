//! Pre-publish filter: a statically-configured ordered rule list.
//!
//! First matching rule wins; the default action is allow. Routing decisions
//! are not made here; this is purely the allow/drop gate ahead of grouping.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use klaxon_model::{LabelSet, Matcher};

use crate::metrics::MetricsSink;
use crate::silence::matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Allow,
    Drop,
}

/// One rule: a label predicate plus its action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub name: String,
    pub matchers: Vec<Matcher>,
    pub action: FilterAction,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Verdict for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    /// Name of the rule that dropped the alert.
    Drop { rule: String },
}

impl FilterDecision {
    pub fn is_drop(&self) -> bool {
        matches!(self, FilterDecision::Drop { .. })
    }
}

#[derive(Clone)]
pub struct FilterEngine {
    rules: Vec<FilterRule>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl FilterEngine {
    pub fn new(rules: Vec<FilterRule>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { rules, metrics }
    }

    pub fn evaluate(&self, labels: &LabelSet) -> FilterDecision {
        for rule in &self.rules {
            if matcher::all_match(&rule.matchers, labels) {
                return match rule.action {
                    FilterAction::Allow => FilterDecision::Allow,
                    FilterAction::Drop => {
                        debug!(
                            rule = %rule.name,
                            reason = rule.reason.as_deref().unwrap_or(""),
                            "alert dropped by filter rule"
                        );
                        self.metrics.incr(
                            "alerts_filtered_total",
                            &[("rule", &rule.name)],
                        );
                        FilterDecision::Drop {
                            rule: rule.name.clone(),
                        }
                    }
                };
            }
        }
        FilterDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    fn engine(rules: Vec<FilterRule>) -> FilterEngine {
        FilterEngine::new(rules, crate::metrics::noop())
    }

    #[test]
    fn default_action_is_allow() {
        let engine = engine(vec![]);
        assert_eq!(
            engine.evaluate(&labels(&[("alertname", "X")])),
            FilterDecision::Allow
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let engine = engine(vec![
            FilterRule {
                name: "allow-prod".into(),
                matchers: vec![Matcher::equal("env", "prod")],
                action: FilterAction::Allow,
                reason: None,
            },
            FilterRule {
                name: "drop-everything".into(),
                matchers: vec![],
                action: FilterAction::Drop,
                reason: Some("catch-all".into()),
            },
        ]);

        assert_eq!(
            engine.evaluate(&labels(&[("env", "prod")])),
            FilterDecision::Allow
        );
        assert_eq!(
            engine.evaluate(&labels(&[("env", "staging")])),
            FilterDecision::Drop {
                rule: "drop-everything".into()
            }
        );
    }

    #[test]
    fn drop_carries_rule_name() {
        let engine = engine(vec![FilterRule {
            name: "drop-noise".into(),
            matchers: vec![Matcher::equal("severity", "noise")],
            action: FilterAction::Drop,
            reason: None,
        }]);
        match engine.evaluate(&labels(&[("severity", "noise")])) {
            FilterDecision::Drop { rule } => assert_eq!(rule, "drop-noise"),
            other => panic!("expected drop, got {other:?}"),
        }
    }
}
