//! The chat platform sends `null`, `""`, `"null"` and `"NaN"` for attributes
//! it has no value for. Those keys are dropped before anything else looks at
//! the payload.

use serde_json::{Map, Value};

pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s == "null" || s == "NaN"
        }
        Value::Number(n) => n.as_f64().is_some_and(f64::is_nan),
        _ => false,
    }
}

/// Removes absent sentinels, recursing into nested objects. An object left
/// empty by the pass is removed as well.
pub fn sanitize(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Object(inner) => {
                let inner = sanitize(inner);
                (!inner.is_empty()).then(|| (key, Value::Object(inner)))
            }
            value if is_absent(&value) => None,
            value => Some((key, value)),
        })
        .collect()
}
