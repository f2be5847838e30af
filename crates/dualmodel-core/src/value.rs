//! Dynamically typed values.
//!
//! `Value` is the currency of the whole workspace: validation input, instance
//! field storage, column data in the engine, and relationship payloads
//! (`Value::Model` holds a shared [`Instance`] handle).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::instance::Instance;
use crate::temporal;
use crate::validate::DumpOptions;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL / absent optional value.
    #[default]
    Null,
    Bool(bool),
    BigInt(i64),
    Double(f64),
    /// Decimal kept in canonical text form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since midnight.
    Time(i64),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
    /// Arbitrary JSON payload.
    Json(serde_json::Value),
    Array(Vec<Value>),
    /// String-keyed mapping; also the shape of validation input.
    Object(BTreeMap<String, Value>),
    /// Another model instance (nested plain model or related table row).
    Model(Instance),
}

impl Value {
    /// Short name of the variant, used in validation messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::BigInt(_) => "integer",
            Value::Double(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "datetime",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Model(_) => "model instance",
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::BigInt(i) => Some(*i as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Model(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Build a value from parsed JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::BigInt(i),
                None => n.as_f64().map_or(Value::Null, Value::Double),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON rendering. Nested instances are dumped with `options`.
    pub fn to_json(&self, options: &DumpOptions) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::BigInt(i) => J::from(*i),
            Value::Double(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::Decimal(s) | Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::String(String::from_utf8_lossy(b).into_owned()),
            Value::Date(d) => J::String(temporal::format_date(*d)),
            Value::Time(t) => J::String(temporal::format_time(*t)),
            Value::Timestamp(ts) => J::String(temporal::format_timestamp(*ts)),
            Value::Uuid(u) => J::String(Uuid::from_bytes(*u).to_string()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => J::Array(
                items
                    .iter()
                    .map(|v| v.to_json(&options.nested()))
                    .collect(),
            ),
            Value::Object(map) => J::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json(&options.nested())))
                    .collect(),
            ),
            Value::Model(instance) => instance.dump(&options.nested()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Value::Model(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Serializes through the JSON form with default dump options.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json(&DumpOptions::default()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_goes_through_json() {
        let value: Value = serde_json::from_str(r#"{"name": "Deadpond", "age": 30}"#).unwrap();
        let Value::Object(map) = &value else {
            panic!("expected object");
        };
        assert_eq!(map["age"], Value::BigInt(30));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"age":30,"name":"Deadpond"}"#
        );
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(serde_json::json!(3)), Value::BigInt(3));
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Double(1.5));
        let obj = Value::from_json(serde_json::json!({"name": "Rusty"}));
        match obj {
            Value::Object(map) => assert_eq!(map["name"], Value::Text("Rusty".into())),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_uuid_dumps_hyphenated() {
        let id = Uuid::parse_str("550E8400E29B41D4A716446655440000").unwrap();
        assert_eq!(
            Value::Uuid(id.into_bytes()).to_json(&DumpOptions::default()),
            serde_json::json!("550e8400-e29b-41d4-a716-446655440000")
        );
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_to_json_formats_temporal() {
        let opts = DumpOptions::default();
        assert_eq!(Value::Date(0).to_json(&opts), serde_json::json!("1970-01-01"));
        assert_eq!(
            Value::Timestamp(90_000_500_000).to_json(&opts),
            serde_json::json!("1970-01-02T01:00:00.500")
        );
        assert_eq!(
            Value::Decimal("1.100".into()).to_json(&opts),
            serde_json::json!("1.100")
        );
    }
}
