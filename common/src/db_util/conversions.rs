//! Safe-ish conversions between stored JSON and application types.

use crate::Document;
use anyhow::{Result, anyhow};
use serde_json::Value;

/// Equality used by filters. Numbers compare by value so `3` matches `3.0`.
#[allow(clippy::float_cmp)]
pub fn values_match(actual: &Value, required: &Value) -> bool {
    match (actual, required) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == required,
    }
}

/// Unwrap a stored body into a document. Only JSON objects are documents.
///
/// # Errors
/// Returns an error if the value is not an object.
pub fn value_to_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "expected a JSON object but found {}",
            json_type_name(&other)
        )),
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render a lookup value as a display name. Strings are used verbatim;
/// numbers and booleans are printed. Anything else has no name.
pub fn display_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
