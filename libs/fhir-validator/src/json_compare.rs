//! Generic JSON comparison used by the fixed/pattern phase and the
//! slicing discriminators.

use serde_json::Value;

/// JSON category name for diagnostics.
pub fn json_category(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural equality with numeric normalisation: integers and floats
/// compare by value, object key order is ignored, array order matters.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y || x.as_f64().zip(y.as_f64()).is_some_and(|(x, y)| x == y)
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Recursive containment: every key of a pattern object must exist in the
/// instance and match recursively; every item of a pattern array must
/// match some instance item (order-independent); primitives compare by
/// [`deep_equal`].
pub fn pattern_contains(instance: &Value, pattern: &Value) -> bool {
    match (instance, pattern) {
        (Value::Object(inst), Value::Object(pat)) => pat
            .iter()
            .all(|(k, p)| inst.get(k).is_some_and(|v| pattern_contains(v, p))),
        (Value::Array(inst), Value::Array(pat)) => pat
            .iter()
            .all(|p| inst.iter().any(|v| pattern_contains(v, p))),
        _ => deep_equal(instance, pattern),
    }
}

/// Format a JSON number without scientific notation so the integer-family
/// regexes can be applied to it.
pub fn format_number_plain(number: &serde_json::Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9e15 => format!("{:.0}", f),
        Some(f) => {
            let formatted = format!("{f}");
            if formatted.contains('e') || formatted.contains('E') {
                // Last resort for magnitudes Display renders exponentially.
                format!("{f:.0}")
            } else {
                formatted
            }
        }
        None => number.to_string(),
    }
}
