//! Conversion between native documents and the portable JSON form stored in
//! snapshot artifacts.
//!
//! Going out, identifiers and references collapse to their hex string. Coming
//! back, only `_id` (and a bare `id`) are turned into native identifiers again.

use super::{DocValue, Document, ObjectId};
use serde_json::{Map, Number, Value};

/// Convert a value into its portable JSON form
pub fn to_portable(value: &DocValue) -> Value {
    match value {
        DocValue::Null => Value::Null,
        DocValue::Bool(b) => Value::Bool(*b),
        DocValue::Int(i) => Value::Number((*i).into()),
        DocValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        DocValue::String(s) => Value::String(s.clone()),
        DocValue::ObjectId(id) => Value::String(id.to_hex()),
        DocValue::Reference { id, .. } => Value::String(id.to_hex()),
        DocValue::DateTime(at) => Value::String(at.to_rfc3339()),
        DocValue::Array(items) => Value::Array(items.iter().map(to_portable).collect()),
        DocValue::Document(inner) => Value::Object(document_to_portable(inner)),
    }
}

/// Convert a whole document into a JSON object
pub fn document_to_portable(document: &Document) -> Map<String, Value> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), to_portable(value)))
        .collect()
}

/// Convert portable JSON back into a value without interpreting strings
pub fn from_portable(value: &Value) -> DocValue {
    match value {
        Value::Null => DocValue::Null,
        Value::Bool(b) => DocValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => DocValue::Int(i),
            None => DocValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => DocValue::String(s.clone()),
        Value::Array(items) => DocValue::Array(items.iter().map(from_portable).collect()),
        Value::Object(map) => DocValue::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), from_portable(value)))
                .collect(),
        ),
    }
}

/// Turn a portable document back into a native one ready for insertion.
///
/// A bare `id` becomes `_id` when `_id` is absent, and a string `_id` that
/// parses as an identifier becomes a native [`ObjectId`]. Returns `None` when
/// the value is not a JSON object.
pub fn rehydrate(value: &Value) -> Option<Document> {
    let map = value.as_object()?;
    let mut document: Document = map
        .iter()
        .map(|(key, value)| (key.clone(), from_portable(value)))
        .collect();

    if !document.contains_key("_id") {
        if let Some(id) = document.remove("id") {
            document.insert("_id".to_string(), id);
        }
    }

    if let Some(DocValue::String(text)) = document.get("_id") {
        if let Ok(id) = text.parse::<ObjectId>() {
            document.insert("_id".to_string(), DocValue::ObjectId(id));
        }
    }

    Some(document)
}
