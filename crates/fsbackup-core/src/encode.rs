//! Entity document encoder.
//!
//! Builds `EntityProto` bytes in the layout the export service writes them:
//! key reference, indexed properties, raw properties, entity group. Used to
//! produce fixtures for the reader and decoder, and by anyone who wants to
//! write small synthetic exports with [`ShardWriter`](crate::log::ShardWriter).

use crate::schema::Meaning;
use bytes::BufMut;
use prost::encoding::{encode_key, encode_varint, WireType};

/// A property value to encode
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Empty value union
    Null,
    /// `int64Value`
    Int(i64),
    /// `booleanValue`
    Bool(bool),
    /// `doubleValue`
    Double(f64),
    /// `stringValue`
    String(Vec<u8>),
    /// `pointValue` group
    Point {
        /// Latitude
        x: f64,
        /// Longitude
        y: f64,
    },
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.as_bytes().to_vec())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v.into_bytes())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::String(v)
    }
}

impl PropertyValue {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            PropertyValue::Null => {}
            PropertyValue::Int(v) => {
                encode_key(1, WireType::Varint, buf);
                encode_varint(*v as u64, buf);
            }
            PropertyValue::Bool(v) => {
                encode_key(2, WireType::Varint, buf);
                encode_varint(u64::from(*v), buf);
            }
            PropertyValue::String(v) => put_bytes(3, v, buf),
            PropertyValue::Double(v) => {
                encode_key(4, WireType::SixtyFourBit, buf);
                buf.put_f64_le(*v);
            }
            PropertyValue::Point { x, y } => {
                encode_key(5, WireType::StartGroup, buf);
                encode_key(6, WireType::SixtyFourBit, buf);
                buf.put_f64_le(*x);
                encode_key(7, WireType::SixtyFourBit, buf);
                buf.put_f64_le(*y);
                encode_key(5, WireType::EndGroup, buf);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum KeyName {
    Name(String),
    Id(i64),
}

#[derive(Debug, Clone)]
struct PropertyEntry {
    name: String,
    meaning: Meaning,
    multiple: bool,
    value: PropertyValue,
}

impl PropertyEntry {
    fn encode(&self, buf: &mut Vec<u8>) {
        if self.meaning != Meaning::NoMeaning {
            encode_key(1, WireType::Varint, buf);
            encode_varint(i64::from(self.meaning) as u64, buf);
        }
        put_bytes(3, self.name.as_bytes(), buf);
        encode_key(4, WireType::Varint, buf);
        encode_varint(u64::from(self.multiple), buf);

        let mut value = Vec::new();
        self.value.encode(&mut value);
        put_bytes(5, &value, buf);
    }
}

/// Builder for one `EntityProto` document.
///
/// ```
/// use fsbackup_core::encode::EntityBuilder;
///
/// let doc = EntityBuilder::new("Greeting", "abc123")
///     .property("greeting", "hi")
///     .multiple("tags", "a")
///     .multiple("tags", "b")
///     .build();
/// assert!(!doc.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    app: String,
    kind: String,
    key: KeyName,
    properties: Vec<PropertyEntry>,
    raw_properties: Vec<PropertyEntry>,
}

impl EntityBuilder {
    /// Starts an entity keyed by name
    pub fn new(kind: &str, name: impl Into<String>) -> Self {
        Self::with_key(kind, KeyName::Name(name.into()))
    }

    /// Starts an entity keyed by numeric id
    pub fn with_id(kind: &str, id: i64) -> Self {
        Self::with_key(kind, KeyName::Id(id))
    }

    fn with_key(kind: &str, key: KeyName) -> Self {
        Self {
            app: "s~fsbackup".to_string(),
            kind: kind.to_string(),
            key,
            properties: Vec::new(),
            raw_properties: Vec::new(),
        }
    }

    /// Sets the application id written into the key
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    fn push(mut self, raw: bool, entry: PropertyEntry) -> Self {
        if raw {
            self.raw_properties.push(entry);
        } else {
            self.properties.push(entry);
        }
        self
    }

    fn entry(name: &str, meaning: Meaning, multiple: bool, value: PropertyValue) -> PropertyEntry {
        PropertyEntry {
            name: name.to_string(),
            meaning,
            multiple,
            value,
        }
    }

    /// Adds an indexed single-valued property
    pub fn property(self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.push(false, Self::entry(name, Meaning::NoMeaning, false, value.into()))
    }

    /// Adds one value of an indexed array property
    pub fn multiple(self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.push(false, Self::entry(name, Meaning::NoMeaning, true, value.into()))
    }

    /// Adds an unindexed single-valued property
    pub fn raw_property(self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.push(true, Self::entry(name, Meaning::NoMeaning, false, value.into()))
    }

    /// Adds one value of an unindexed array property
    pub fn raw_multiple(self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.push(true, Self::entry(name, Meaning::NoMeaning, true, value.into()))
    }

    /// Adds a property with an explicit meaning
    pub fn property_with_meaning(
        self,
        name: &str,
        meaning: Meaning,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.push(false, Self::entry(name, meaning, false, value.into()))
    }

    /// Adds a stored null
    pub fn null_property(self, name: &str) -> Self {
        self.push(false, Self::entry(name, Meaning::NoMeaning, false, PropertyValue::Null))
    }

    /// Adds an empty array
    pub fn empty_list(self, name: &str) -> Self {
        self.push(false, Self::entry(name, Meaning::EmptyList, false, PropertyValue::Null))
    }

    /// Adds an embedded entity (an unindexed `ENTITY_PROTO` property)
    pub fn embedded(self, name: &str, entity: EntityBuilder) -> Self {
        let value = PropertyValue::String(entity.build());
        self.push(true, Self::entry(name, Meaning::EntityProto, false, value))
    }

    /// Serializes the entity
    pub fn build(&self) -> Vec<u8> {
        let mut path = Vec::new();
        encode_key(1, WireType::StartGroup, &mut path);
        put_bytes(2, self.kind.as_bytes(), &mut path);
        match &self.key {
            KeyName::Id(id) => {
                encode_key(3, WireType::Varint, &mut path);
                encode_varint(*id as u64, &mut path);
            }
            KeyName::Name(name) => put_bytes(4, name.as_bytes(), &mut path),
        }
        encode_key(1, WireType::EndGroup, &mut path);

        let mut reference = Vec::new();
        put_bytes(13, self.app.as_bytes(), &mut reference);
        put_bytes(14, &path, &mut reference);

        let mut buf = Vec::new();
        put_bytes(13, &reference, &mut buf);
        for property in &self.properties {
            let mut encoded = Vec::new();
            property.encode(&mut encoded);
            put_bytes(14, &encoded, &mut buf);
        }
        for property in &self.raw_properties {
            let mut encoded = Vec::new();
            property.encode(&mut encoded);
            put_bytes(15, &encoded, &mut buf);
        }
        put_bytes(16, &path, &mut buf);
        buf
    }
}

fn put_bytes(tag: u32, payload: &[u8], buf: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_layout() {
        let doc = EntityBuilder::new("K", "a").app("x").build();
        // key: Reference { app: "x", path: Path { Element { type: "K", name: "a" } } }
        let path = [0x0B, 0x12, 0x01, b'K', 0x22, 0x01, b'a', 0x0C];
        let mut expected = vec![0x6A, 0x0D, 0x6A, 0x01, b'x', 0x72, 0x08];
        expected.extend_from_slice(&path);
        expected.extend_from_slice(&[0x82, 0x01, 0x08]);
        expected.extend_from_slice(&path);
        assert_eq!(doc, expected);
    }

    #[test]
    fn test_property_layout() {
        let mut buf = Vec::new();
        EntityBuilder::entry("x", Meaning::NoMeaning, false, PropertyValue::Int(42))
            .encode(&mut buf);
        assert_eq!(buf, vec![0x1A, 0x01, b'x', 0x20, 0x00, 0x2A, 0x02, 0x08, 0x2A]);
    }

    #[test]
    fn test_meaning_is_written_first() {
        let mut buf = Vec::new();
        EntityBuilder::entry("e", Meaning::EmptyList, false, PropertyValue::Null).encode(&mut buf);
        assert_eq!(&buf[..2], &[0x08, 24]);
    }
}
