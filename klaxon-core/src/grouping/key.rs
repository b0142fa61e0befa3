//! Deterministic group key derivation.

use klaxon_model::{Fingerprint, GroupKey, LabelSet};

use crate::fingerprint::fnv1a;

/// The `group_by` entry that groups every alert by its own fingerprint.
pub const WILDCARD: &str = "...";

/// Join the values of the configured `group_by` labels; the `...` wildcard
/// (or an empty configuration) falls back to the fingerprint. Keys longer
/// than `max_len` are hash-truncated so downstream storage sees a bound.
pub fn compute(
    group_by: &[String],
    labels: &LabelSet,
    fingerprint: Fingerprint,
    max_len: usize,
) -> GroupKey {
    if group_by.is_empty() || group_by.iter().any(|name| name == WILDCARD) {
        return GroupKey::new(fingerprint.as_hex());
    }

    let joined = group_by
        .iter()
        .map(|name| labels.get(name).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("|");

    if joined.len() <= max_len {
        return GroupKey::new(joined);
    }

    // Keep a readable prefix, then pin identity with the full-string hash.
    let hash = fnv1a(joined.as_bytes());
    let budget = max_len.saturating_sub(17).max(1);
    let mut end = budget.min(joined.len());
    while end > 0 && !joined.is_char_boundary(end) {
        end -= 1;
    }
    GroupKey::new(format!("{}#{hash:016x}", &joined[..end]))
}
