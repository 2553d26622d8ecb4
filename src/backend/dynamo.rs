//! Decoder for DynamoDB's wire-level attribute values.
//!
//! Items read through the backend's DynamoDB proxy come back as
//! `{"S": "..."}`, `{"N": "42"}`, `{"M": {...}}` and so on. This turns them
//! into plain JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use super::error::BackendError;

/// One DynamoDB attribute value, tagged by its wire type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
  S(String),
  /// Numbers travel as strings
  N(String),
  #[serde(rename = "BOOL")]
  Bool(bool),
  #[serde(rename = "NULL")]
  Null(bool),
  L(Vec<AttributeValue>),
  M(BTreeMap<String, AttributeValue>),
  SS(Vec<String>),
  NS(Vec<String>),
  /// Base64 payload, kept encoded
  B(String),
  BS(Vec<String>),
}

const TAGS: [&str; 10] = ["S", "N", "BOOL", "NULL", "L", "M", "SS", "NS", "B", "BS"];

fn parse_number(raw: &str) -> Result<Value, BackendError> {
  let raw = raw.trim();
  if let Ok(i) = raw.parse::<i64>() {
    return Ok(Value::Number(i.into()));
  }
  raw
    .parse::<f64>()
    .ok()
    .and_then(Number::from_f64)
    .map(Value::Number)
    .ok_or_else(|| BackendError::Decode(format!("invalid number {:?}", raw)))
}

impl AttributeValue {
  /// Convert into a plain JSON value, recursing into lists and maps.
  pub fn into_json(self) -> Result<Value, BackendError> {
    Ok(match self {
      AttributeValue::S(s) | AttributeValue::B(s) => Value::String(s),
      AttributeValue::N(n) => parse_number(&n)?,
      AttributeValue::Bool(b) => Value::Bool(b),
      AttributeValue::Null(_) => Value::Null,
      AttributeValue::L(items) => Value::Array(
        items
          .into_iter()
          .map(AttributeValue::into_json)
          .collect::<Result<_, _>>()?,
      ),
      AttributeValue::M(map) => unmarshall_item(map)?,
      AttributeValue::SS(items) | AttributeValue::BS(items) => {
        Value::Array(items.into_iter().map(Value::String).collect())
      }
      AttributeValue::NS(items) => Value::Array(
        items
          .iter()
          .map(|n| parse_number(n))
          .collect::<Result<_, _>>()?,
      ),
    })
  }
}

/// Convert a full DynamoDB item into a JSON object.
pub fn unmarshall_item(item: BTreeMap<String, AttributeValue>) -> Result<Value, BackendError> {
  let mut out = Map::new();
  for (key, value) in item {
    out.insert(key, value.into_json()?);
  }
  Ok(Value::Object(out))
}

fn is_tagged(map: &Map<String, Value>) -> bool {
  map.len() == 1 && map.keys().all(|k| TAGS.contains(&k.as_str()))
}

/// Lenient decoder for values that may or may not be attribute-tagged.
///
/// Tagged objects are unwrapped, anything else is walked recursively and
/// left as is. Malformed tagged values are kept verbatim.
pub fn decode_value(value: &Value) -> Value {
  match value {
    Value::Object(map) if is_tagged(map) => {
      match serde_json::from_value::<AttributeValue>(value.clone()).map(AttributeValue::into_json) {
        Ok(Ok(decoded)) => decoded,
        _ => value.clone(),
      }
    }
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect(),
    ),
    Value::Array(items) => Value::Array(items.iter().map(decode_value).collect()),
    other => other.clone(),
  }
}
