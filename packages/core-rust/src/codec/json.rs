//! JSON codec plus path extraction, deep merge, and field filtering helpers.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{mime, Codec, CodecError, CodecValue};

/// Encodes `serde_json::Value`s and plain text as JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec whose `encode` output is indented with two spaces.
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Re-renders JSON text with two-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if `data` is not valid JSON.
    pub fn pretty_print(data: &[u8]) -> Result<String, CodecError> {
        let value: Value = serde_json::from_slice(data)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Re-renders JSON text without insignificant whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if `data` is not valid JSON.
    pub fn compact(data: &[u8]) -> Result<String, CodecError> {
        let value: Value = serde_json::from_slice(data)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// Walks a dot-separated path through nested objects and arrays.
    ///
    /// Array positions may be written as `[2]`, as a bare `2`, or attached
    /// to a key as `items[2]`. A missing key, an out-of-range index, or a
    /// type mismatch yields `None`.
    #[must_use]
    pub fn extract_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        if path.is_empty() {
            return Some(value);
        }
        let mut current = value;
        for segment in path.split('.') {
            let (key, indices) = split_segment(segment)?;
            if !key.is_empty() {
                current = match current {
                    Value::Object(map) => map.get(key)?,
                    Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
            for index in indices {
                current = current.as_array()?.get(index)?;
            }
        }
        Some(current)
    }

    /// Deep-merges two JSON objects.
    ///
    /// Keys present in both where both values are objects are merged
    /// recursively; in every other case the value from `overlay` wins.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidData`] unless both inputs are objects.
    pub fn merge(base: &Value, overlay: &Value) -> Result<Value, CodecError> {
        match (base, overlay) {
            (Value::Object(a), Value::Object(b)) => Ok(Value::Object(merge_maps(a, b))),
            _ => Err(CodecError::InvalidData(
                "merge requires two JSON objects".to_string(),
            )),
        }
    }

    /// Restricts every object in `value`, at any depth and inside arrays,
    /// to the keys in `fields`. Non-object leaves pass through unchanged.
    #[must_use]
    pub fn filter(value: &Value, fields: &[&str]) -> Value {
        let allowed: HashSet<&str> = fields.iter().copied().collect();
        filter_value(value, &allowed)
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[mime::APPLICATION_JSON]
    }

    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError> {
        let json = match value {
            CodecValue::Json(v) => v.clone(),
            CodecValue::Text(s) => Value::String(s.clone()),
            CodecValue::Chars(chars) => Value::String(chars.iter().collect()),
            other => {
                return Err(CodecError::UnsupportedInput {
                    codec: self.name(),
                    input: other.type_name(),
                })
            }
        };
        if self.pretty {
            Ok(serde_json::to_vec_pretty(&json)?)
        } else {
            Ok(serde_json::to_vec(&json)?)
        }
    }

    fn decode(&self, data: &[u8]) -> Result<CodecValue, CodecError> {
        Ok(CodecValue::Json(serde_json::from_slice(data)?))
    }

    fn validate(&self, value: &CodecValue) -> Result<(), CodecError> {
        match value {
            CodecValue::Json(_) | CodecValue::Text(_) | CodecValue::Chars(_) => Ok(()),
            other => Err(CodecError::UnsupportedInput {
                codec: self.name(),
                input: other.type_name(),
            }),
        }
    }
}

/// Splits `items[1][2]` into `("items", [1, 2])`. Returns `None` on a
/// malformed bracket expression.
fn split_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].trim().parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((key, indices))
}

fn merge_maps(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, value) in overlay {
        let merged = match (out.get(key), value) {
            (Some(Value::Object(a)), Value::Object(b)) => Value::Object(merge_maps(a, b)),
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn filter_value(value: &Value, allowed: &HashSet<&str>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| allowed.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), filter_value(v, allowed)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| filter_value(v, allowed)).collect()),
        other => other.clone(),
    }
}
