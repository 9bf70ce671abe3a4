//! Text codec for key material.
//!
//! Values are written as JSON. Binary buffers become tagged objects:
//!
//! ```json
//! {"type": "Buffer", "data": "AQID"}
//! ```
//!
//! `data` is standard padded base64. On the way back the decoder also accepts
//! the array form `{"type": "Buffer", "data": [1, 2, 3]}` and the
//! `{"buffer": true, "value": ...}` marker written by older stores.
//!
//! A map that would read back as one of those tags (its `type` is `"Buffer"`
//! or `"Map"`, or it carries `buffer: true` next to a `value`) is written
//! wrapped as `{"type": "Map", "value": {...}}` so it decodes to the same map.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};

use crate::{error::DecodeError, value::KeyValue};

const TYPE_FIELD: &str = "type";
const BUFFER_TAG: &str = "Buffer";
const DATA_FIELD: &str = "data";
const LEGACY_MARKER: &str = "buffer";
const LEGACY_DATA_FIELD: &str = "value";
const MAP_TAG: &str = "Map";
const MAP_FIELD: &str = "value";

/// Encode a value to its persisted text form.
pub fn encode(value: &KeyValue) -> String {
    to_json(value).to_string()
}

/// Decode persisted text. Empty or blank input yields an empty map.
pub fn decode(text: &str) -> Result<KeyValue, DecodeError> {
    if text.trim().is_empty() {
        return Ok(KeyValue::map());
    }
    let json: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::new("$", e.to_string()))?;
    from_json(json, "$")
}

pub fn to_json(value: &KeyValue) -> Value {
    match value {
        KeyValue::Null => Value::Null,
        KeyValue::Bool(b) => Value::Bool(*b),
        KeyValue::Number(n) => Value::Number(n.clone()),
        KeyValue::String(s) => Value::String(s.clone()),
        KeyValue::Bytes(bytes) => {
            let mut tagged = Map::with_capacity(2);
            tagged.insert(TYPE_FIELD.into(), Value::String(BUFFER_TAG.into()));
            tagged.insert(DATA_FIELD.into(), Value::String(STANDARD.encode(bytes)));
            Value::Object(tagged)
        }
        KeyValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
        KeyValue::Map(map) => {
            let object: Map<String, Value> = map
                .iter()
                .map(|(key, item)| (key.clone(), to_json(item)))
                .collect();
            if !is_reserved(&object) {
                return Value::Object(object);
            }
            let mut wrapped = Map::with_capacity(2);
            wrapped.insert(TYPE_FIELD.into(), Value::String(MAP_TAG.into()));
            wrapped.insert(MAP_FIELD.into(), Value::Object(object));
            Value::Object(wrapped)
        }
    }
}

pub fn from_json(json: Value, path: &str) -> Result<KeyValue, DecodeError> {
    match json {
        Value::Null => Ok(KeyValue::Null),
        Value::Bool(b) => Ok(KeyValue::Bool(b)),
        Value::Number(n) => Ok(KeyValue::Number(n)),
        Value::String(s) => Ok(KeyValue::String(s)),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| from_json(item, &format!("{path}[{idx}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(KeyValue::List),
        Value::Object(mut object) => {
            if is_buffer(&object) {
                let (field, data) = if let Some(data) = object.remove(DATA_FIELD) {
                    (DATA_FIELD, data)
                } else if let Some(data) = object.remove(LEGACY_DATA_FIELD) {
                    (LEGACY_DATA_FIELD, data)
                } else {
                    (DATA_FIELD, Value::Null)
                };
                return buffer_bytes(data, &format!("{path}.{field}")).map(KeyValue::Bytes);
            }
            if is_wrapped_map(&object) {
                if let Some(Value::Object(inner)) = object.remove(MAP_FIELD) {
                    return map_fields(inner, &format!("{path}.{MAP_FIELD}"));
                }
            }
            map_fields(object, path)
        }
    }
}

fn map_fields(object: Map<String, Value>, path: &str) -> Result<KeyValue, DecodeError> {
    let mut map = BTreeMap::new();
    for (key, item) in object {
        let child = from_json(item, &format!("{path}.{key}"))?;
        map.insert(key, child);
    }
    Ok(KeyValue::Map(map))
}

fn tag(object: &Map<String, Value>) -> Option<&str> {
    object.get(TYPE_FIELD).and_then(Value::as_str)
}

fn is_buffer(object: &Map<String, Value>) -> bool {
    tag(object) == Some(BUFFER_TAG)
        || (object.get(LEGACY_MARKER).and_then(Value::as_bool) == Some(true)
            && object.contains_key(LEGACY_DATA_FIELD))
}

fn is_wrapped_map(object: &Map<String, Value>) -> bool {
    tag(object) == Some(MAP_TAG) && object.get(MAP_FIELD).is_some_and(Value::is_object)
}

/// Plain maps the decoder would not read back as themselves.
fn is_reserved(object: &Map<String, Value>) -> bool {
    is_buffer(object) || tag(object) == Some(MAP_TAG)
}

fn buffer_bytes(data: Value, path: &str) -> Result<Vec<u8>, DecodeError> {
    match data {
        Value::String(b64) => STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| DecodeError::new(path, format!("invalid base64 buffer: {e}"))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        DecodeError::new(format!("{path}[{idx}]"), "buffer element is not a byte")
                    })
            })
            .collect(),
        Value::Null => Err(DecodeError::new(path, "buffer object without data")),
        other => Err(DecodeError::new(
            path,
            format!("buffer data must be base64 text or a byte array, got {other}"),
        )),
    }
}
