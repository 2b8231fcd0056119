use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Key/value synonym table applied during strict canonicalization. Catalog
/// feeds flip between spellings of the same option name across refreshes;
/// both the raw token and its whitespace-stripped form are consulted.
const SYNONYMS: &[(&str, &str)] = &[("색깔", "색상"), ("칼라", "색상"), ("colour", "color")];

/// Drop whitespace and zero-width characters from a property token.
fn token_norm(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect()
}

fn synonym_for(raw: &str, normalized: &str) -> String {
    for (from, to) in SYNONYMS {
        if raw == *from || normalized == *from {
            return (*to).to_string();
        }
    }
    normalized.to_string()
}

/// Parse a raw properties payload into a list of key/value maps.
///
/// Accepts a JSON array of objects, a single object, or a string containing
/// either. Parse failure means "no properties", never an error.
pub fn parse_props(raw: &Value) -> Vec<IndexMap<String, String>> {
    let parsed: Value = match raw {
        Value::Null => return Vec::new(),
        Value::String(s) => match serde_json::from_str(s) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        },
        other => other.clone(),
    };
    let items: Vec<Value> = match parsed {
        Value::Array(arr) => arr,
        obj @ Value::Object(_) => vec![obj],
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(
                obj.into_iter()
                    .map(|(k, v)| (k, value_to_token(&v)))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn value_to_token(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn is_empty_props(parsed: &[IndexMap<String, String>]) -> bool {
    parsed.is_empty() || (parsed.len() == 1 && parsed[0].is_empty())
}

/// Strict canonical serialization of a properties payload.
///
/// Keys and values are whitespace-stripped and synonym-mapped, entries are
/// sorted by key, and duplicate keys created by synonym mapping are merged
/// keeping the first value. Empty or unparseable payloads canonicalize to
/// the empty string.
pub fn canonical_props(raw: &Value) -> String {
    let parsed = parse_props(raw);
    if is_empty_props(&parsed) {
        return String::new();
    }

    let canon: Vec<Value> = parsed
        .iter()
        .map(|obj| {
            let mut pairs: Vec<(String, String)> = obj
                .iter()
                .map(|(k, v)| {
                    let k_mapped = synonym_for(k, &token_norm(k));
                    let v_norm = token_norm(v);
                    let v_mapped = synonym_for(v, &v_norm);
                    (k_mapped, v_mapped)
                })
                .collect();
            // Stable sort: among keys merged by the synonym map, the pair
            // that appeared first in the payload keeps its value.
            pairs.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut merged = Map::new();
            for (k, v) in pairs {
                merged.entry(k).or_insert(Value::String(v));
            }
            Value::Object(merged)
        })
        .collect();

    serde_json::to_string(&canon).unwrap_or_default()
}

/// Loose comparison key for a properties payload.
///
/// Order-insensitive like the canonical form but without synonym mapping:
/// the payload is parsed, each object's entries are sorted, and the stable
/// serialization is stripped of structural characters. Unparseable strings
/// are stripped as-is so legacy free-text payloads still compare.
pub fn props_compare_key(raw: &Value) -> String {
    let parsed = parse_props(raw);
    if is_empty_props(&parsed) {
        if let Value::String(s) = raw {
            return strip_for_compare(s);
        }
        return String::new();
    }

    let stable: Vec<Value> = parsed
        .iter()
        .map(|obj| {
            let mut pairs: Vec<(&str, &str)> =
                obj.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (k, v) in pairs {
                sorted
                    .entry(k.to_string())
                    .or_insert(Value::String(v.to_string()));
            }
            Value::Object(sorted)
        })
        .collect();

    strip_for_compare(&serde_json::to_string(&stable).unwrap_or_default())
}

/// Comparison strip: remove braces, brackets, parens, quotes and whitespace.
pub fn strip_for_compare(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '{' | '}' | '[' | ']' | '(' | ')' | '"') && !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_sorts_and_strips() {
        let raw = json!([{"사이즈": " L ", "색상": "블랙 "}]);
        assert_eq!(
            canonical_props(&raw),
            r#"[{"사이즈":"L","색상":"블랙"}]"#
        );
    }

    #[test]
    fn canonical_applies_key_synonyms_and_merges_first_wins() {
        // 색깔 maps onto 색상; the original 색상 entry came first and wins.
        let raw = json!([{"색상": "블랙", "색깔": "화이트"}]);
        assert_eq!(canonical_props(&raw), r#"[{"색상":"블랙"}]"#);
    }

    #[test]
    fn canonical_parses_serialized_payloads() {
        let raw = Value::String(r#"[{"b":"2","a":"1"}]"#.to_string());
        assert_eq!(canonical_props(&raw), r#"[{"a":"1","b":"2"}]"#);
    }

    #[test]
    fn parse_failure_means_no_properties() {
        let raw = Value::String("not json at all".to_string());
        assert_eq!(canonical_props(&raw), "");
    }

    #[test]
    fn empty_payload_shapes_canonicalize_to_empty() {
        assert_eq!(canonical_props(&Value::Null), "");
        assert_eq!(canonical_props(&json!([])), "");
        assert_eq!(canonical_props(&json!([{}])), "");
    }

    #[test]
    fn compare_key_is_order_insensitive_without_synonyms() {
        let a = Value::String(r#"[{"색깔":"블랙","사이즈":"L"}]"#.to_string());
        let b = Value::String(r#"[{"사이즈":"L","색깔":"블랙"}]"#.to_string());
        assert_eq!(props_compare_key(&a), props_compare_key(&b));
        // No synonym mapping at this tier: 색깔 stays 색깔.
        assert!(props_compare_key(&a).contains("색깔"));
    }

    #[test]
    fn compare_key_strips_unparseable_strings() {
        let raw = Value::String("{색상: 블랙}".to_string());
        assert_eq!(props_compare_key(&raw), "색상:블랙");
    }

    #[test]
    fn strip_removes_structure_chars() {
        assert_eq!(strip_for_compare(r#"[{"a": "1"}]"#), "a:1");
    }
}
