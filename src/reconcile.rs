//! SKU reconciliation: map an incoming variant observation onto a stored
//! variant of the same product, or declare it new.
//!
//! Upstream variant ids churn between catalog passes for the same physical
//! variant, so identity is derived from normalized display attributes. Two
//! strictness tiers absorb historical drift in how older records were
//! canonicalized: the loose comparison key is tried first, then the strict
//! canonical key.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::database_ops::products::VariantDoc;
use crate::normalization::{canonical_props, color_key, props_compare_key};

/// Both lookup keys for an incoming `(color, properties)` pair.
#[derive(Debug, Clone)]
pub struct IncomingKeys {
    pub color: String,
    pub strict_props: String,
    pub loose_props: String,
}

impl IncomingKeys {
    pub fn from_raw(color: &str, properties: &Value) -> Self {
        Self {
            color: color_key(color),
            strict_props: canonical_props(properties),
            loose_props: props_compare_key(properties),
        }
    }
}

/// Matcher verdict: exactly one of matched-existing or declared-new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Index into the stored variant slice.
    Existing(usize),
    New,
}

// \u{1} cannot appear in normalized keys, so the joined form is unambiguous.
fn join_key(color: &str, props: &str) -> String {
    format!("\u{1}{color}\u{1}{props}")
}

/// Two-level lookup table over a product's stored variants, rebuilt per
/// product per run.
pub struct VariantIndex {
    loose: HashMap<String, usize>,
    strict: HashMap<String, usize>,
}

impl VariantIndex {
    pub fn build(product_id: &str, stored: &[VariantDoc]) -> Self {
        let mut loose: HashMap<String, usize> = HashMap::new();
        let mut strict: HashMap<String, usize> = HashMap::new();
        for (idx, variant) in stored.iter().enumerate() {
            // Stored colors/props were normalized at write time, but legacy
            // rows may predate the current rules; renormalizing is idempotent
            // for clean data and repairs the rest.
            let color = color_key(&variant.c);
            let loose_key = join_key(
                &color,
                &props_compare_key(&Value::String(variant.sp.clone())),
            );
            let strict_key = join_key(&color, &variant.sp);

            for (map, key, tier) in [
                (&mut loose, loose_key, "loose"),
                (&mut strict, strict_key, "strict"),
            ] {
                if let Some(&first) = map.get(&key) {
                    // Should not happen under the write-time uniqueness
                    // invariant; historical bad writes can still produce it.
                    // Keep the first stored variant deterministically.
                    warn!(
                        product_id,
                        tier,
                        kept_sid = %stored[first].sid,
                        dropped_sid = %variant.sid,
                        "match-key collision between stored variants"
                    );
                } else {
                    map.insert(key, idx);
                }
            }
        }
        Self { loose, strict }
    }

    /// Resolution order: loose key, then strict key, then new.
    pub fn resolve(&self, keys: &IncomingKeys) -> MatchOutcome {
        let loose = join_key(&keys.color, &keys.loose_props);
        if let Some(&idx) = self.loose.get(&loose) {
            // Drift monitor: a loose hit whose strict counterpart would have
            // missed means the stored canonical form has diverged.
            let strict = join_key(&keys.color, &keys.strict_props);
            if !self.strict.contains_key(&strict) {
                debug!(color = %keys.color, "variant matched only at loose tier");
            }
            return MatchOutcome::Existing(idx);
        }
        let strict = join_key(&keys.color, &keys.strict_props);
        if let Some(&idx) = self.strict.get(&strict) {
            return MatchOutcome::Existing(idx);
        }
        MatchOutcome::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn stored(sid: &str, color: &str, props: &Value) -> VariantDoc {
        VariantDoc {
            sid: sid.to_string(),
            c: color_key(color),
            sp: canonical_props(props),
            sp_key: props_compare_key(props),
            link: None,
            cur: "KRW".into(),
            pd: BTreeMap::new(),
        }
    }

    #[test]
    fn matches_despite_variant_id_churn() {
        let props = json!([{"색상": "블랙", "사이즈": "L"}]);
        let variants = vec![stored("old-id-123", "Black", &props)];
        let index = VariantIndex::build("p1", &variants);

        // Same physical variant, new upstream id, reordered properties.
        let incoming = IncomingKeys::from_raw(
            "black",
            &json!([{"사이즈": "L", "색상": "블랙"}]),
        );
        assert_eq!(index.resolve(&incoming), MatchOutcome::Existing(0));
    }

    #[test]
    fn strict_tier_catches_synonym_drift() {
        // Stored record was written with the canonical key 색상; the feed
        // now spells it 색깔. The loose key keeps the raw spelling and
        // misses; the strict canonicalization maps it back.
        let variants = vec![stored("1", "black", &json!([{"색상": "블랙"}]))];
        let index = VariantIndex::build("p1", &variants);

        let incoming = IncomingKeys::from_raw("black", &json!([{"색깔": "블랙"}]));
        assert_eq!(index.resolve(&incoming), MatchOutcome::Existing(0));
    }

    #[test]
    fn unmatched_variant_is_declared_new() {
        let variants = vec![stored("1", "black", &json!([{"색상": "블랙"}]))];
        let index = VariantIndex::build("p1", &variants);

        let incoming = IncomingKeys::from_raw("white", &json!([{"색상": "화이트"}]));
        assert_eq!(index.resolve(&incoming), MatchOutcome::New);
    }

    #[test]
    fn totality_on_empty_stored_set() {
        let index = VariantIndex::build("p1", &[]);
        let incoming = IncomingKeys::from_raw("red", &Value::Null);
        assert_eq!(index.resolve(&incoming), MatchOutcome::New);
    }

    #[test]
    fn collision_resolves_to_first_in_stored_order() {
        let props = json!([{"색상": "블랙"}]);
        let variants = vec![stored("first", "black", &props), stored("second", "black", &props)];
        let index = VariantIndex::build("p1", &variants);

        let incoming = IncomingKeys::from_raw("black", &props);
        assert_eq!(index.resolve(&incoming), MatchOutcome::Existing(0));
    }

    #[test]
    fn color_noise_does_not_split_identity() {
        let props = json!([{"사이즈": "M"}]);
        let variants = vec![stored("1", "Space Gray", &props)];
        let index = VariantIndex::build("p1", &variants);

        let incoming = IncomingKeys::from_raw("space-gray\u{200B}", &props);
        assert_eq!(index.resolve(&incoming), MatchOutcome::Existing(0));
    }
}
