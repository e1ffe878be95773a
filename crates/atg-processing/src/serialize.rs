//! Conversion of arbitrary provider values into storage-safe properties
//!
//! Graph stores accept primitives and lists of primitives. Maps are encoded as
//! JSON strings (insertion order, non-ASCII preserved) and capped at a maximum
//! length; empty maps become `Null` because stores reject them as properties.

use atg_storage::{GraphValue, PropertyMap};
use serde_json::{Map, Value};
use std::fmt;

pub const DEFAULT_MAX_JSON_LENGTH: usize = 5000;
pub const TRUNCATION_MARKER: &str = "...(truncated)";

const PREVIEW_CHARS: usize = 100;

/// A provider SDK object that is not plain JSON.
///
/// Serialization prefers the dict-like export, then the object's `name`, then
/// its display form.
pub trait ProviderObject: fmt::Display + Send + Sync {
    fn as_dict(&self) -> Option<Value> {
        None
    }

    fn name(&self) -> Option<&str> {
        None
    }
}

/// Serialize a single JSON value for storage
pub fn serialize_value(value: &Value, max_length: usize) -> GraphValue {
    match value {
        Value::Null => GraphValue::Null,
        Value::Bool(b) => GraphValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => GraphValue::Int(i),
            // above i64::MAX: a float would lose digits
            (None, Some(_)) => GraphValue::String(n.to_string()),
            (None, None) => GraphValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => GraphValue::String(s.clone()),
        Value::Array(items) => GraphValue::List(
            items
                .iter()
                .map(|item| serialize_value(item, max_length))
                .collect(),
        ),
        Value::Object(map) => serialize_map(map, max_length),
    }
}

/// Serialize a provider SDK object for storage
pub fn serialize_object(object: &dyn ProviderObject, max_length: usize) -> GraphValue {
    if let Some(exported) = object.as_dict() {
        return serialize_value(&exported, max_length);
    }
    if let Some(name) = object.name() {
        return GraphValue::String(name.to_string());
    }
    GraphValue::String(object.to_string())
}

/// Serialize every entry of a property map
pub fn serialize_properties(fields: &Map<String, Value>, max_length: usize) -> PropertyMap {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), serialize_value(value, max_length)))
        .collect()
}

fn serialize_map(map: &Map<String, Value>, max_length: usize) -> GraphValue {
    if map.is_empty() {
        return GraphValue::Null;
    }

    let encoded = match serde_json::to_string(map) {
        Ok(json) => json,
        Err(err) => {
            tracing::debug!(error = %err, "map is not JSON-encodable, using debug form");
            format!("{map:?}")
        }
    };

    GraphValue::String(cap_length(encoded, max_length))
}

fn cap_length(encoded: String, max_length: usize) -> String {
    let len = encoded.len();

    if len > max_length {
        let preview: String = encoded.chars().take(PREVIEW_CHARS).collect();
        tracing::warn!(
            length = len,
            max_length,
            preview = %preview,
            "serialized property exceeds maximum length, truncating"
        );

        if max_length < TRUNCATION_MARKER.len() {
            return TRUNCATION_MARKER[..max_length].to_string();
        }
        let mut keep = max_length - TRUNCATION_MARKER.len();
        while keep > 0 && !encoded.is_char_boundary(keep) {
            keep -= 1;
        }
        let mut truncated = String::with_capacity(keep + TRUNCATION_MARKER.len());
        truncated.push_str(&encoded[..keep]);
        truncated.push_str(TRUNCATION_MARKER);
        return truncated;
    }

    if len * 10 > max_length * 8 {
        tracing::info!(
            length = len,
            max_length,
            "serialized property is above 80% of the maximum length"
        );
    }

    encoded
}
