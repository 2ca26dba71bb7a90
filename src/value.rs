//! Native and wire value representations.
//!
//! [`Value`] is what callers hand to a remote operation and what they get
//! back: scalars, ordered lists and ordered records. [`WireValue`] is the
//! packed form produced by the marshaler, ready to be written as XML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Native value exchanged with remote operations.
///
/// Records keep insertion order. A record may carry a "declared subtype" key
/// (`xsi_type`, `type`, `*.Type` or `*_Type`) naming a type more specific
/// than the statically declared one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Schema-absence sentinel
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    /// Pre-encoded XML fragment, passed to the wire untouched
    #[serde(skip_deserializing)]
    Raw(String),
}

impl Value {
    /// Build a record from key/value pairs, preserving order.
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list of values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// True for values the sparse encoding omits: `Null`, empty text,
    /// empty lists and empty records.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Record(fields) => fields.is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a key in a record value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(key))
    }

    /// Short name of the value's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Raw(_) => "raw",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Value::Record(fields)
    }
}

/// Packed value ready for XML serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    /// Text already escaped for XML content
    Text(String),
    /// Pre-encoded XML fragment
    Raw(String),
    /// Emitted as repeated elements under the enclosing name
    Sequence(Vec<WireValue>),
    Struct(WireStruct),
}

/// A packed record: namespace-prefixed keys in wire order, plus the
/// explicit type annotation written as `xsi:type`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireStruct {
    pub type_name: Option<String>,
    pub fields: Vec<(String, WireValue)>,
}

impl WireStruct {
    pub fn field(&self, key: &str) -> Option<&WireValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(Value::record::<&str, _>([]).is_empty());
        assert!(!Value::from("x").is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::Bool(false).is_empty());
    }

    #[test]
    fn test_record_preserves_order() {
        let value = Value::record([
            ("zeta", Value::from("1")),
            ("alpha", Value::from("2")),
        ]);
        let keys: Vec<_> = value.as_record().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(value.get("alpha"), Some(&Value::from("2")));
    }

    #[test]
    fn test_json_conversion() {
        let value: Value =
            serde_json::from_str(r#"{"name": "x", "ids": ["1", "2"], "flag": true, "n": null}"#)
                .unwrap();
        assert_eq!(value.get("name"), Some(&Value::from("x")));
        assert_eq!(value.get("ids"), Some(&Value::list(["1", "2"])));
        assert_eq!(value.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(value.get("n"), Some(&Value::Null));

        let back = serde_json::to_string(&value).unwrap();
        assert!(back.starts_with(r#"{"name":"x""#));
    }
}
