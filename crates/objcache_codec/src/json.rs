//! Conversion between [`Value`] and JSON.
//!
//! JSON has no byte strings or timestamps, so the mapping is lossy in the
//! outbound direction: bytes become lowercase hex text and timestamps become
//! RFC 3339 text. Inbound numbers must be integers.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde_json::{Map, Number, Value as Json};

/// Converts a JSON document into a [`Value`].
pub fn from_json(json: &Json) -> CodecResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) if n.is_f64() => return Err(CodecError::FloatForbidden),
        Json::Number(n) => Value::Integer(
            n.as_i64()
                .ok_or_else(|| CodecError::invalid_structure(format!("integer {n} out of range")))?,
        ),
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => {
            Value::Array(items.iter().map(from_json).collect::<CodecResult<_>>()?)
        }
        Json::Object(fields) => Value::map(
            fields
                .iter()
                .map(|(k, v)| Ok((Value::Text(k.clone()), from_json(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
    })
}

/// Converts a [`Value`] into JSON.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::Number(Number::from(*n)),
        Value::Bytes(bytes) => Json::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Value::Text(s) => Json::String(s.clone()),
        Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => {
            let mut object = Map::new();
            for (k, v) in pairs {
                let key = match k {
                    Value::Text(s) => s.clone(),
                    other => other.to_string(),
                };
                object.insert(key, to_json(v));
            }
            Json::Object(object)
        }
    }
}
