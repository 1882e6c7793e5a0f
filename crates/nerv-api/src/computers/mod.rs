//! Typed front-ends for the computers the HTTP API talks to.
//!
//! Each interface resolves its computer through the registry on every call, so
//! a reconnect is picked up transparently and a missing computer fails fast.

pub mod battery;
pub mod me_system;

pub use battery::{Battery, Flush};
pub use me_system::{ListKind, ListParams, MeSystem};

use nerv_wire::Payload;
use serde_json::Value;

/// Whether a job result carries a truthy `error` field.
///
/// Such results are the computer reporting its own failure and are returned
/// to the HTTP caller unchanged.
pub fn reports_error(result: &Payload) -> bool {
    result.get("error").is_some_and(is_truthy)
}

/// Loose truthiness as agents use it: `null`, `false`, `0` and `""` are false.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_reports_error() {
        assert!(reports_error(&result(json!({"error": true}))));
        assert!(reports_error(&result(json!({"error": "Storage offline"}))));
        assert!(reports_error(&result(json!({"error": 1}))));
        assert!(!reports_error(&result(json!({"error": false}))));
        assert!(!reports_error(&result(json!({"error": null}))));
        assert!(!reports_error(&result(json!({"error": ""}))));
        assert!(!reports_error(&result(json!({"error": 0}))));
        assert!(!reports_error(&result(json!({"energy": 5}))));
    }
}
