//! Matcher evaluation shared by silences, inhibition rules, and the filter.
//!
//! Regex matchers are anchored: the pattern must cover the whole label
//! value, matching Alertmanager semantics. An absent label evaluates as the
//! empty string.

use regex::Regex;
use tracing::warn;

use klaxon_model::{LabelSet, Matcher, MatcherType};

use crate::error::{AlertError, Result};

/// Compile a pattern with full-string anchoring.
pub fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
        AlertError::Validation(format!("bad regex matcher {pattern:?}: {err}"))
    })
}

/// Evaluate one matcher against a label set.
pub fn matcher_matches(matcher: &Matcher, labels: &LabelSet) -> Result<bool> {
    let value = labels.get(&matcher.name).unwrap_or("");
    Ok(match matcher.match_type {
        MatcherType::Equal => value == matcher.value,
        MatcherType::NotEqual => value != matcher.value,
        MatcherType::Regex => compile_anchored(&matcher.value)?.is_match(value),
        MatcherType::NotRegex => !compile_anchored(&matcher.value)?.is_match(value),
    })
}

/// An alert matches iff **every** matcher matches. A matcher that fails to
/// compile is logged and treated as non-matching so a bad rule suppresses
/// nothing instead of everything.
pub fn all_match(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|matcher| {
        matcher_matches(matcher, labels).unwrap_or_else(|err| {
            warn!(matcher = %matcher.name, error = %err, "unusable matcher skipped");
            false
        })
    })
}

/// Validate every matcher in a rule compiles; used on the write path so bad
/// regexes are rejected at creation rather than silently ignored later.
pub fn validate_matchers(matchers: &[Matcher]) -> Result<()> {
    for matcher in matchers {
        if matcher.match_type.is_regex() {
            compile_anchored(&matcher.value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn equal_and_not_equal() {
        let labels = labels(&[("env", "prod")]);
        assert!(matcher_matches(&Matcher::equal("env", "prod"), &labels).unwrap());
        assert!(!matcher_matches(&Matcher::equal("env", "staging"), &labels).unwrap());
        let ne = Matcher {
            name: "env".into(),
            value: "staging".into(),
            match_type: MatcherType::NotEqual,
        };
        assert!(matcher_matches(&ne, &labels).unwrap());
    }

    #[test]
    fn regex_is_full_string_anchored() {
        let labels = labels(&[("instance", "host-12")]);
        assert!(matcher_matches(&Matcher::regex("instance", "host-.*"), &labels).unwrap());
        // A substring match would accept this; anchoring must reject it.
        assert!(!matcher_matches(&Matcher::regex("instance", "host"), &labels).unwrap());
    }

    #[test]
    fn absent_label_is_empty_string() {
        let labels = labels(&[("env", "prod")]);
        assert!(matcher_matches(&Matcher::equal("region", ""), &labels).unwrap());
        assert!(matcher_matches(&Matcher::regex("region", ".*"), &labels).unwrap());
    }

    #[test]
    fn all_match_requires_every_matcher() {
        let labels = labels(&[("alertname", "HighCPU"), ("env", "prod")]);
        let matchers = vec![
            Matcher::equal("alertname", "HighCPU"),
            Matcher::equal("env", "staging"),
        ];
        assert!(!all_match(&matchers, &labels));
    }

    #[test]
    fn invalid_regex_is_rejected_on_validation() {
        let matchers = vec![Matcher::regex("env", "(unclosed")];
        assert!(validate_matchers(&matchers).is_err());
    }
}
