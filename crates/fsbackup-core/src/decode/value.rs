//! Decoded values and entities.

use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// Reserved output field holding the entity key
pub const KEY_FIELD: &str = "_key";

/// Field name to value mapping
pub type Map = BTreeMap<String, Value>;

/// A decoded value.
///
/// Property values are schema-polymorphic, so the decoder produces this closed
/// sum type rather than typed structs.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Stored null (an empty value union)
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE double
    Double(f64),
    /// Decoded UTF-8 text (property names, keys)
    Text(String),
    /// Raw string payload, left for the caller to interpret
    Bytes(Bytes),
    /// Ordered sequence
    List(Vec<Value>),
    /// Nested object
    Map(Map),
}

impl Value {
    /// Returns the nested map, if this is one
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the integer, if this is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns raw bytes or the bytes of a text value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns the value as text, decoding raw bytes as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Looks up a field of a nested map
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(field))
    }

    /// Returns true for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
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

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => serializer.serialize_str(s),
                Err(_) => serializer.serialize_bytes(b),
            },
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => serialize_map(map, serializer),
        }
    }
}

fn serialize_map<S: Serializer>(map: &Map, serializer: S) -> Result<S::Ok, S::Error> {
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (k, v) in map {
        out.serialize_entry(k, v)?;
    }
    out.end()
}

/// One decoded entity: its properties plus the reserved [`KEY_FIELD`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    fields: Map,
}

impl Entity {
    /// Wraps an already folded field map
    pub fn from_map(fields: Map) -> Self {
        Self { fields }
    }

    /// The entity key (first path element name), if the document had one
    pub fn key(&self) -> Option<&Value> {
        self.fields.get(KEY_FIELD)
    }

    /// Looks up a property by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields including the key, ordered by name
    pub fn fields(&self) -> &Map {
        &self.fields
    }

    /// Number of fields including the key
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the entity carries neither key nor properties
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consumes the entity, returning its field map
    pub fn into_map(self) -> Map {
        self.fields
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Map(entity.fields)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_map(&self.fields, serializer)
    }
}
