//! Schema-driven entity decoder.
//!
//! Walks the protobuf wire format of one logical document against a
//! [`SchemaTree`], producing [`Value`]s without going through a reflective
//! message type. The walk is a recursive function over `(buffer, cursor, end)`
//! with no state outside the call stack, so one [`Decoder`] can be shared by
//! any number of threads.
//!
//! ## Post-processing
//!
//! Two message kinds are reshaped once their fields are collected:
//!
//! - **Property**: the name becomes text and the value union is unwrapped
//!   according to the property's meaning. `ENTITY_PROTO` values are decoded
//!   again as complete root documents.
//! - **Entity**: the key is taken from `key.path.element[0]` and every entry of
//!   `property` then `rawProperty` is folded into one map by name.

mod value;
mod wire;

use crate::error::{Error, Result};
use crate::schema::{
    entity_schema, FieldNode, FieldType, Meaning, MessageId, MessageKind, SchemaTree,
};
use bytes::Bytes;
use tracing::trace;

pub use value::{Entity, Map, Value, KEY_FIELD};
pub use wire::{
    decode_varint, read_fixed32, read_fixed64, read_len, read_tag, read_varint, skip_value, take,
    Tag, WireType,
};

/// Maximum message/group nesting the decoder follows
pub const MAX_DEPTH: usize = 64;

/// What to do with a field id the schema does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFieldPolicy {
    /// Consume the field's bytes and carry on
    #[default]
    Skip,
    /// Fail the document with [`Error::UnknownField`]
    Fail,
}

/// Configuration for the decoder
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Handling of undeclared field ids
    pub unknown_fields: UnknownFieldPolicy,
}

impl DecoderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unknown field policy
    pub fn unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }
}

/// Decodes entity documents against a schema tree
#[derive(Debug, Clone)]
pub struct Decoder<'s> {
    schema: &'s SchemaTree,
    config: DecoderConfig,
}

impl Decoder<'static> {
    /// Creates a decoder over the built-in entity schema
    pub fn new() -> Result<Self> {
        Ok(Self::with_schema(entity_schema()?))
    }
}

impl<'s> Decoder<'s> {
    /// Creates a decoder over an explicit schema
    pub fn with_schema(schema: &'s SchemaTree) -> Self {
        Self {
            schema,
            config: DecoderConfig::default(),
        }
    }

    /// Replaces the configuration
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// The schema this decoder walks
    pub fn schema(&self) -> &'s SchemaTree {
        self.schema
    }

    /// Decodes one logical document as a root entity.
    pub fn decode(&self, document: &Bytes) -> Result<Entity> {
        match self.decode_root(document, 0)? {
            Value::Map(map) => Ok(Entity::from_map(map)),
            // the root is an entity node, which always folds into a map
            other => Err(Error::invalid_wire_format(
                0,
                format!("root message decoded to {:?}", other),
            )),
        }
    }

    /// Decodes `buf` as a message of type `node`, returning its field map (or
    /// the post-processed shape for property, union and entity nodes).
    pub fn decode_message(&self, buf: &Bytes, node: MessageId) -> Result<Value> {
        let mut pos = 0;
        self.walk(buf, &mut pos, buf.len(), node, 0)
    }

    fn decode_root(&self, buf: &Bytes, depth: usize) -> Result<Value> {
        let mut pos = 0;
        self.walk(buf, &mut pos, buf.len(), self.schema.root(), depth)
    }

    fn walk(
        &self,
        buf: &Bytes,
        pos: &mut usize,
        end: usize,
        node_id: MessageId,
        depth: usize,
    ) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::RecursionLimit { limit: MAX_DEPTH });
        }

        let node = self.schema.node(node_id);
        let union = node.kind() == MessageKind::ValueUnion;
        let mut fields = Map::new();

        while *pos < end {
            let tag_offset = *pos;
            let tag = read_tag(buf, pos, end)?;

            if tag.wire_type == WireType::EndGroup {
                break;
            }

            let Some(field) = node.field(tag.field) else {
                match self.config.unknown_fields {
                    UnknownFieldPolicy::Skip => {
                        trace!(
                            "skipping unknown field {} in {} at {}",
                            tag.field,
                            node.name(),
                            tag_offset
                        );
                        skip_value(buf, pos, end, tag.wire_type)?;
                        continue;
                    }
                    UnknownFieldPolicy::Fail => {
                        return Err(Error::UnknownField {
                            field: tag.field,
                            message: node.name(),
                            offset: tag_offset,
                        });
                    }
                }
            };

            let value = match tag.wire_type {
                WireType::Varint => {
                    let raw = read_varint(buf, pos, end)?;
                    let value = varint_value(field, raw);
                    if union {
                        return Ok(value);
                    }
                    value
                }
                WireType::I64 => {
                    let raw = read_fixed64(buf, pos, end)?;
                    let value = match field.ty {
                        FieldType::Double => Value::Double(f64::from_bits(raw)),
                        _ => Value::Int(raw as i64),
                    };
                    if union {
                        return Ok(value);
                    }
                    value
                }
                WireType::Len => {
                    let mut len = read_len(buf, pos, end)?;
                    match field.message() {
                        None => {
                            let bytes = buf.slice(*pos..*pos + len);
                            *pos += len;
                            Value::Bytes(bytes)
                        }
                        Some(child) => {
                            if len == 1 && field.length_wrapped {
                                len = read_len(buf, pos, end)?;
                            }
                            let child_end = *pos + len;
                            let mut child_pos = *pos;
                            let value =
                                self.walk(buf, &mut child_pos, child_end, child, depth + 1)?;
                            *pos = child_end;
                            value
                        }
                    }
                }
                WireType::StartGroup => match field.message() {
                    Some(child) => self.walk(buf, pos, end, child, depth + 1)?,
                    None => {
                        skip_value(buf, pos, end, WireType::StartGroup)?;
                        continue;
                    }
                },
                WireType::EndGroup => break,
                WireType::I32 => {
                    return Err(Error::UnknownWireType {
                        wire_type: WireType::I32 as u8,
                        offset: tag_offset,
                    });
                }
            };

            if field.repeated {
                match fields
                    .entry(field.name.to_string())
                    .or_insert_with(|| Value::List(Vec::new()))
                {
                    Value::List(items) => items.push(value),
                    slot => *slot = Value::List(vec![value]),
                }
            } else {
                fields.insert(field.name.to_string(), value);
            }
        }

        match node.kind() {
            MessageKind::Plain | MessageKind::ValueUnion => Ok(Value::Map(fields)),
            MessageKind::Property => self.finish_property(fields, depth),
            MessageKind::Entity => Ok(Value::Map(finish_entity(fields))),
        }
    }

    fn finish_property(&self, mut fields: Map, depth: usize) -> Result<Value> {
        if let Some(name) = fields.remove("name") {
            fields.insert("name".to_string(), text(name));
        }

        let meaning = fields
            .get("meaning")
            .and_then(Value::as_i64)
            .map(Meaning::from)
            .unwrap_or(Meaning::NoMeaning);
        let raw = fields.remove("value").unwrap_or_default();

        let value = match meaning {
            Meaning::EntityProto => match unwrap_value(raw) {
                Value::Bytes(bytes) => self.decode_root(&bytes, depth + 1)?,
                other => other,
            },
            Meaning::EmptyList => Value::List(Vec::new()),
            _ => unwrap_value(raw),
        };
        fields.insert("value".to_string(), value);
        Ok(Value::Map(fields))
    }
}

fn varint_value(field: &FieldNode, raw: u64) -> Value {
    match field.ty {
        FieldType::Bool => Value::Bool(raw != 0),
        FieldType::Int32 => Value::Int(i64::from(raw as i32)),
        _ => Value::Int(raw as i64),
    }
}

fn text(value: Value) -> Value {
    match value {
        Value::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
        other => other,
    }
}

/// Reduces a decoded value union to the variant it carries.
fn unwrap_value(value: Value) -> Value {
    match value {
        Value::Map(mut map) => {
            for variant in ["stringValue", "pointValue", "userValue", "referenceValue"] {
                if let Some(v) = map.remove(variant) {
                    return v;
                }
            }
            if map.is_empty() {
                Value::Null
            } else {
                Value::Map(map)
            }
        }
        scalar => scalar,
    }
}

fn finish_entity(mut fields: Map) -> Map {
    let mut out = Map::new();

    let first_element = fields
        .get("key")
        .and_then(|key| key.get("path"))
        .and_then(|path| path.get("element"))
        .and_then(Value::as_list)
        .and_then(|elements| elements.first());
    if let Some(element) = first_element {
        if let Some(name) = element.get("name") {
            out.insert(KEY_FIELD.to_string(), text(name.clone()));
        } else if let Some(id) = element.get("id") {
            out.insert(KEY_FIELD.to_string(), id.clone());
        }
    }

    for collection in ["property", "rawProperty"] {
        let Some(Value::List(properties)) = fields.remove(collection) else {
            continue;
        };
        for property in properties {
            fold_property(&mut out, property);
        }
    }
    out
}

fn fold_property(out: &mut Map, property: Value) {
    let Value::Map(mut property) = property else {
        return;
    };
    let name = match property.remove("name") {
        Some(Value::Text(name)) => name,
        _ => String::new(),
    };
    let multiple = property
        .get("multiple")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let value = property.remove("value").unwrap_or_default();

    if multiple {
        match out.entry(name).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => items.push(value),
            slot => *slot = Value::List(vec![value]),
        }
    } else {
        out.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EntityBuilder, PropertyValue};
    use pretty_assertions::assert_eq;

    fn decode(doc: Vec<u8>) -> Entity {
        Decoder::new().unwrap().decode(&Bytes::from(doc)).unwrap()
    }

    #[test]
    fn test_scalar_property() {
        let doc = EntityBuilder::new("Thing", "k").property("x", 42i64).build();
        let entity = decode(doc);
        assert_eq!(entity.get("x"), Some(&Value::Int(42)));
        assert_eq!(entity.key(), Some(&Value::from("k")));
    }

    #[test]
    fn test_scalar_kinds() {
        let doc = EntityBuilder::new("Thing", "k")
            .property("flag", true)
            .property("ratio", 0.25f64)
            .property("neg", -7i64)
            .property("s", "hello")
            .null_property("nothing")
            .build();
        let entity = decode(doc);
        assert_eq!(entity.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(entity.get("ratio"), Some(&Value::Double(0.25)));
        assert_eq!(entity.get("neg"), Some(&Value::Int(-7)));
        assert_eq!(
            entity.get("s"),
            Some(&Value::Bytes(Bytes::from_static(b"hello")))
        );
        assert_eq!(entity.get("nothing"), Some(&Value::Null));
    }

    #[test]
    fn test_multiple_values_keep_order() {
        let doc = EntityBuilder::new("Thing", "k")
            .multiple("tags", "a")
            .property("other", 1i64)
            .multiple("tags", "b")
            .build();
        let entity = decode(doc);
        assert_eq!(
            entity.get("tags"),
            Some(&Value::List(vec![
                Value::Bytes(Bytes::from_static(b"a")),
                Value::Bytes(Bytes::from_static(b"b")),
            ]))
        );
    }

    #[test]
    fn test_raw_properties_follow_indexed_ones() {
        let doc = EntityBuilder::new("Thing", "k")
            .raw_multiple("mixed", 2i64)
            .multiple("mixed", 1i64)
            .build();
        let entity = decode(doc);
        assert_eq!(
            entity.get("mixed"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn test_non_repeated_last_write_wins() {
        let doc = EntityBuilder::new("Thing", "k")
            .property("x", 1i64)
            .property("x", 2i64)
            .build();
        assert_eq!(decode(doc).get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_embedded_entity() {
        let inner = EntityBuilder::new("Child", "c1").property("n", 5i64);
        let doc = EntityBuilder::new("Thing", "k").embedded("child", inner).build();
        let entity = decode(doc);

        let child = entity.get("child").and_then(Value::as_map).unwrap();
        assert_eq!(child.get(KEY_FIELD), Some(&Value::from("c1")));
        assert_eq!(child.get("n"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_empty_list_meaning() {
        let doc = EntityBuilder::new("Thing", "k").empty_list("items").build();
        assert_eq!(decode(doc).get("items"), Some(&Value::List(vec![])));
    }

    #[test]
    fn test_point_value() {
        let doc = EntityBuilder::new("Thing", "k")
            .property("where", PropertyValue::Point { x: 1.5, y: -2.0 })
            .build();
        let point = decode(doc);
        let point = point.get("where").unwrap();
        assert_eq!(point.get("x"), Some(&Value::Double(1.5)));
        assert_eq!(point.get("y"), Some(&Value::Double(-2.0)));
    }

    #[test]
    fn test_numeric_key_falls_back_to_id() {
        let doc = EntityBuilder::with_id("Thing", 77).property("x", 1i64).build();
        assert_eq!(decode(doc).key(), Some(&Value::Int(77)));
    }

    #[test]
    fn test_length_wrapped_value() {
        // Property { name: "x", value: len 1, inner len 2, int64Value = 42 }
        let property = [0x1A, 0x01, b'x', 0x2A, 0x01, 0x02, 0x08, 0x2A];
        let mut doc = vec![0x72, property.len() as u8];
        doc.extend_from_slice(&property);

        let entity = decode(doc);
        assert_eq!(entity.get("x"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_unknown_wire_type() {
        // field 14 with wire type 6
        let doc = Bytes::from_static(&[0x76, 0x00]);
        let err = Decoder::new().unwrap().decode(&doc).unwrap_err();
        assert!(matches!(err, Error::UnknownWireType { wire_type: 6, offset: 0 }));
        assert!(err.is_document_scoped());
    }

    #[test]
    fn test_unknown_field_policy() {
        // field 99 varint, then a scalar property
        let mut doc = vec![0x98, 0x06, 0x01];
        doc.extend(EntityBuilder::new("Thing", "k").property("x", 3i64).build());
        let doc = Bytes::from(doc);

        let skip = Decoder::new().unwrap();
        assert_eq!(skip.decode(&doc).unwrap().get("x"), Some(&Value::Int(3)));

        let strict = Decoder::new()
            .unwrap()
            .with_config(DecoderConfig::new().unknown_fields(UnknownFieldPolicy::Fail));
        assert!(matches!(
            strict.decode(&doc),
            Err(Error::UnknownField { field: 99, message: "EntityProto", .. })
        ));
    }

    #[test]
    fn test_truncated_document() {
        let doc = EntityBuilder::new("Thing", "k").property("x", 1i64).build();
        let cut = Bytes::from(doc[..doc.len() - 2].to_vec());
        let err = Decoder::new().unwrap().decode(&cut).unwrap_err();
        assert!(err.is_document_scoped());
    }

    #[test]
    fn test_empty_document() {
        let entity = decode(Vec::new());
        assert!(entity.is_empty());
    }

    #[test]
    fn test_recursion_limit() {
        let mut inner = EntityBuilder::new("Leaf", "leaf");
        for depth in 0..MAX_DEPTH {
            inner = EntityBuilder::new("Node", depth.to_string()).embedded("child", inner);
        }
        let doc = Bytes::from(inner.build());
        let err = Decoder::new().unwrap().decode(&doc).unwrap_err();
        assert!(matches!(err, Error::RecursionLimit { .. }));
    }
}
