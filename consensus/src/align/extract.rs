//! Last-resort partial extraction
//!
//! When no repair pass yields parseable JSON, scan the raw text for flat
//! item-shaped objects (a brace pair containing a `"name"` key) and rebuild
//! what can be recovered. Object bodies and the number of matches are both
//! bounded so pathological inputs stay cheap.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::repair::strip_trailing_separators;

/// Upper bound on recovered objects per response
pub const MAX_PARTIAL_ITEMS: usize = 500;

static ITEM_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]{0,600}?"name"\s*:\s*"[^"]{1,200}"[^{}]{0,600}\}"#)
        .expect("ITEM_OBJECT_RE regex should compile")
});

static STRING_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_]+)"\s*:\s*"([^"]{0,500})""#)
        .expect("STRING_FIELD_RE regex should compile")
});

static NUMBER_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_]+)"\s*:\s*(-?\d+(?:\.\d+)?)"#)
        .expect("NUMBER_FIELD_RE regex should compile")
});

/// Recover item-shaped objects from unparseable text.
///
/// Each object is parsed directly when possible; otherwise its string and
/// numeric fields are pulled out one by one.
pub fn extract_partial_items(raw: &str) -> Vec<Map<String, Value>> {
    ITEM_OBJECT_RE
        .find_iter(raw)
        .take(MAX_PARTIAL_ITEMS)
        .filter_map(|m| parse_fragment(m.as_str()))
        .collect()
}

fn parse_fragment(fragment: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_trailing_separators(fragment);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(map);
    }

    let mut map = Map::new();
    for caps in STRING_FIELD_RE.captures_iter(fragment) {
        map.insert(caps[1].to_string(), Value::String(caps[2].to_string()));
    }
    for caps in NUMBER_FIELD_RE.captures_iter(fragment) {
        if let Ok(n) = caps[2].parse::<f64>() {
            if let Some(number) = serde_json::Number::from_f64(n) {
                map.entry(caps[1].to_string())
                    .or_insert(Value::Number(number));
            }
        }
    }

    map.contains_key("name").then_some(map)
}
