//! Parameter normalizer.
//!
//! Converts the untyped `params` object of a job into string values
//! suitable for `--<key> <value>` slicer flags:
//!
//! | JSON value            | Flag value            |
//! |-----------------------|-----------------------|
//! | integer (`20`)        | `20`                  |
//! | float (`0.2`)         | `0.2000`              |
//! | boolean               | `true` / `false`      |
//! | string (`test`)       | `"test"` (quoted)     |
//! | null, array, object   | key dropped           |
//!
//! String values keep their surrounding double quotes.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

/// Normalized parameters, keyed by flag name. Sorted so that the
/// generated command line is stable for a given input.
pub type NormalizedParams = BTreeMap<String, String>;

/// Normalize every recognized entry of `raw`; unrecognized value types
/// are silently skipped.
pub fn normalize_params(raw: &Map<String, Value>) -> NormalizedParams {
    raw.iter()
        .filter_map(|(key, value)| normalize_value(value).map(|v| (key.clone(), v)))
        .collect()
}

/// Serialize a single parameter value, or `None` if its type is not supported.
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(format_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(format!("\"{s}\"")),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        // Every non-integer JSON number is representable as f64.
        format!("{:.4}", n.as_f64().unwrap_or_default())
    }
}

/// Flatten normalized params into CLI arguments: `["--k1", "v1", "--k2", "v2", ...]`.
pub fn to_cli_args(params: &NormalizedParams) -> Vec<String> {
    params
        .iter()
        .flat_map(|(key, value)| [format!("--{key}"), value.clone()])
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
