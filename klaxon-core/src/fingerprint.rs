//! Canonical alert identity: FNV-1a 64 over the sorted label set.
//!
//! Collision-equivalent to Alertmanager's label signature so fingerprints
//! computed here agree with upstream tooling: labels are visited in sorted
//! order, and each name and value is followed by a `0xff` separator byte.

use klaxon_model::{Fingerprint, LabelSet};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const SEPARATOR: u8 = 0xff;

/// Signature of the empty label set: the FNV offset basis, untouched.
pub const EMPTY_FINGERPRINT: Fingerprint = Fingerprint(FNV_OFFSET_BASIS);

/// Compute the canonical fingerprint of a label set.
pub fn fingerprint(labels: &LabelSet) -> Fingerprint {
    if labels.is_empty() {
        return EMPTY_FINGERPRINT;
    }

    let mut hash = FNV_OFFSET_BASIS;
    for (name, value) in labels.iter() {
        hash = fnv1a_bytes(hash, name.as_bytes());
        hash = fnv1a_byte(hash, SEPARATOR);
        hash = fnv1a_bytes(hash, value.as_bytes());
        hash = fnv1a_byte(hash, SEPARATOR);
    }
    Fingerprint(hash)
}

/// Hash arbitrary bytes with the same parameters; used for key truncation.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_bytes(FNV_OFFSET_BASIS, bytes)
}

fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash = fnv1a_byte(hash, *byte);
    }
    hash
}

#[inline]
fn fnv1a_byte(hash: u64, byte: u8) -> u64 {
    (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_label_set_hashes_to_offset_basis() {
        assert_eq!(fingerprint(&LabelSet::new()), EMPTY_FINGERPRINT);
    }

    #[test]
    fn fingerprint_is_permutation_invariant() {
        // LabelSet sorts internally, so insertion order must not matter.
        let a = labels(&[
            ("alertname", "HighCPU"),
            ("instance", "h1"),
            ("severity", "critical"),
        ]);
        let b = labels(&[
            ("severity", "critical"),
            ("alertname", "HighCPU"),
            ("instance", "h1"),
        ]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn distinct_label_sets_diverge() {
        let a = labels(&[("alertname", "HighCPU"), ("instance", "h1")]);
        let b = labels(&[("alertname", "HighCPU"), ("instance", "h2")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn separator_prevents_boundary_ambiguity() {
        // Without separators {"ab": "c"} and {"a": "bc"} would collide.
        let a = labels(&[("ab", "c")]);
        let b = labels(&[("a", "bc")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn known_vector_matches_alertmanager() {
        // Signature of {a="b"} under the upstream algorithm.
        let mut expected = FNV_OFFSET_BASIS;
        for byte in [b'a', 0xff, b'b', 0xff] {
            expected = (expected ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
        }
        assert_eq!(fingerprint(&labels(&[("a", "b")])), Fingerprint(expected));
    }

    #[test]
    fn round_trips_through_serde() {
        let original = labels(&[("alertname", "HighCPU"), ("env", "prod")]);
        let json = serde_json::to_string(&original).expect("serialize");
        let parsed: LabelSet = serde_json::from_str(&json).expect("parse");
        assert_eq!(fingerprint(&parsed), fingerprint(&original));
    }
}
