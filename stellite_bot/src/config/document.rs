//! Operations on the configuration as a plain JSON tree.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Replace the value of every key named `key` anywhere in the tree, looking
/// through nested objects and lists of objects alike.
///
/// Returns how many values were replaced. Zero means the key wasn't found,
/// which is not an error.
///
/// This matches by bare key name, so a name used in two unrelated places
/// changes both. Callers are expected to check the result still makes sense.
pub fn update_by_key(document: &mut Value, key: &str, new_value: Value) -> usize {
    match document {
        Value::Object(map) => {
            let mut replaced = 0;
            for (name, value) in map.iter_mut() {
                if name == key {
                    *value = new_value.clone();
                    replaced += 1;
                } else {
                    replaced += update_by_key(value, key, new_value.clone());
                }
            }
            replaced
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| update_by_key(item, key, new_value.clone()))
            .sum(),
        _ => 0,
    }
}

/// Top-level keys holding what the bot keeps track of, rather than settings.
const STATE_KEYS: &[&str] = &["poll"];

/// [`update_by_key`] for settings an admin types in. The poll is skipped:
/// keys of its answers are names people choose for themselves.
pub fn update_setting(document: &mut Value, key: &str, new_value: Value) -> usize {
    let Value::Object(map) = document else {
        return update_by_key(document, key, new_value);
    };

    map.iter_mut()
        .filter(|(name, _)| !STATE_KEYS.contains(&name.as_str()))
        .map(|(name, value)| {
            if name == key {
                *value = new_value.clone();
                1
            } else {
                update_by_key(value, key, new_value.clone())
            }
        })
        .sum()
}

/// Add top-level keys from `template` that `document` lacks. Existing keys
/// are left alone, even when their values differ, and nothing is removed.
///
/// Returns names of the added keys.
pub fn merge_missing(document: &mut Value, template: &Value) -> Vec<String> {
    let (Value::Object(document), Value::Object(template)) = (document, template) else {
        return Vec::new();
    };

    let mut added = Vec::new();
    for (key, value) in template {
        if !document.contains_key(key) {
            document.insert(key.clone(), value.clone());
            added.push(key.clone());
        }
    }
    added
}

/// Parse `key=value` pairs as typed after `/config`.
///
/// Values are read as JSON if they parse as such, so `ban_bots=false` sets a
/// bool and `pairing_asset=USDT` sets a string. Quoted strings, lists and
/// objects may contain spaces as long as they don't nest.
pub fn parse_assignments(text: &str) -> Vec<(String, Value)> {
    static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"([A-Za-z0-9_]+)=("[^"]*"|\[[^\]]*\]|\{[^}]*\}|\S+)"#)
            .expect("Regex will always be valid")
    });

    ASSIGNMENT
        .captures_iter(text)
        .map(|captures| {
            let key = captures[1].to_string();
            let raw = &captures[2];
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            (key, value)
        })
        .collect()
}
