//! `{name}` template substitution over heterogeneous values.
//!
//! Used everywhere a step configuration references workflow variables: API
//! URLs, query parameters, request bodies, LLM prompts, and notification
//! texts. Missing names are left literal (and logged) rather than raised, so
//! a half-bound template degrades instead of failing the step.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Matches `{name}` placeholders. Whitespace inside the braces is tolerated
/// and normalized away before lookup.
static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// Canonical stringification for substituted values: strings verbatim,
/// numbers in decimal, booleans as `true`/`false`, structured values as
/// compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Replace every `{name}` occurrence in `template` with the stringified value
/// of `variables[name]`. Unknown names stay literal.
pub fn format_template(template: &str, variables: &HashMap<String, Value>) -> String {
    VARIABLE_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => stringify(value),
                None => {
                    tracing::warn!(name, "template variable not found, leaving literal");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Apply [`format_template`] recursively: strings are formatted, mapping
/// values and list elements are visited, everything else passes through.
pub fn format_value(value: &Value, variables: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(format_template(s, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| format_value(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), format_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Format every value of a string-keyed mapping in place.
pub fn format_map(
    map: &HashMap<String, Value>,
    variables: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), format_value(v, variables)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
