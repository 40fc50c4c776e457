//! Message schema tree.
//!
//! The entity message family is described statically ([`SchemaDef`]) with
//! type references by name. [`SchemaTree::build`] resolves those names once
//! into an arena of [`MessageNode`]s whose field tables are indexed directly by
//! field id, so decoding never looks anything up by name.
//!
//! Self and mutual references (an embedded entity pointing back at the root
//! message) are plain [`MessageId`] indices into the arena.

mod entity;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

pub use entity::{Meaning, ENTITY_SCHEMA};

/// How the decoder post-processes a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Fields are collected as decoded
    Plain,
    /// A value union: the first scalar variant read is the whole value
    ValueUnion,
    /// A property record (name, meaning, value)
    Property,
    /// The root entity message
    Entity,
}

/// Field type as written in a static description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    /// int64 varint
    Int64,
    /// int32 varint
    Int32,
    /// bool varint
    Bool,
    /// enum varint
    Enum,
    /// IEEE double
    Double,
    /// fixed64
    Fixed64,
    /// UTF-8 string (kept as raw bytes by the decoder)
    String,
    /// raw bytes
    Bytes,
    /// length-delimited message, by name
    Message(&'static str),
    /// group, by name
    Group(&'static str),
}

/// One field of a static message description
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Field id
    pub id: u32,
    /// Output name
    pub name: &'static str,
    /// Declared type
    pub ty: TypeRef,
    /// Repeated label
    pub repeated: bool,
    /// A length of exactly 1 is an outer wrapper around the real length
    pub length_wrapped: bool,
}

impl FieldDef {
    /// A singular field
    pub const fn new(id: u32, name: &'static str, ty: TypeRef) -> Self {
        Self {
            id,
            name,
            ty,
            repeated: false,
            length_wrapped: false,
        }
    }

    /// Marks the field repeated
    pub const fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Marks the field as a one-byte length wrapper
    pub const fn length_wrapped(mut self) -> Self {
        self.length_wrapped = true;
        self
    }
}

/// One message of a static description
#[derive(Debug, Clone, Copy)]
pub struct MessageDef {
    /// Fully qualified name within the package (`Outer.Inner`)
    pub name: &'static str,
    /// Post-processing kind
    pub kind: MessageKind,
    /// Fields
    pub fields: &'static [FieldDef],
}

/// A static, versioned description of a message family
#[derive(Debug, Clone, Copy)]
pub struct SchemaDef {
    /// Protobuf package the family comes from
    pub package: &'static str,
    /// Revision of this description
    pub version: u32,
    /// Name of the root message
    pub root: &'static str,
    /// All messages, in any order
    pub messages: &'static [MessageDef],
}

/// Index of a message node in a [`SchemaTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(usize);

/// Resolved field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// int64 varint
    Int64,
    /// int32 varint
    Int32,
    /// bool varint
    Bool,
    /// enum varint
    Enum,
    /// IEEE double
    Double,
    /// fixed64
    Fixed64,
    /// string
    String,
    /// bytes
    Bytes,
    /// length-delimited message
    Message(MessageId),
    /// group
    Group(MessageId),
}

/// A resolved field descriptor
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Field id
    pub id: u32,
    /// Output name
    pub name: &'static str,
    /// Resolved type
    pub ty: FieldType,
    /// Repeated label
    pub repeated: bool,
    /// One-byte length wrapper quirk applies
    pub length_wrapped: bool,
}

impl FieldNode {
    /// The nested message node for message and group fields
    pub fn message(&self) -> Option<MessageId> {
        match self.ty {
            FieldType::Message(id) | FieldType::Group(id) => Some(id),
            _ => None,
        }
    }
}

/// A resolved message type
#[derive(Debug, Clone)]
pub struct MessageNode {
    name: &'static str,
    kind: MessageKind,
    // indexed by field id
    fields: Vec<Option<FieldNode>>,
}

impl MessageNode {
    /// Message name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Post-processing kind
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Looks up a field by id
    #[inline]
    pub fn field(&self, id: u32) -> Option<&FieldNode> {
        self.fields.get(id as usize).and_then(Option::as_ref)
    }

    /// Iterates over the declared fields in id order
    pub fn fields(&self) -> impl Iterator<Item = &FieldNode> {
        self.fields.iter().flatten()
    }
}

/// An immutable, resolved schema
#[derive(Debug, Clone)]
pub struct SchemaTree {
    package: &'static str,
    version: u32,
    root: MessageId,
    messages: Vec<MessageNode>,
}

impl SchemaTree {
    /// Resolves a static description into a tree
    pub fn build(def: &SchemaDef) -> Result<Self> {
        let mut ids = HashMap::with_capacity(def.messages.len());
        for (index, message) in def.messages.iter().enumerate() {
            if ids.insert(message.name, MessageId(index)).is_some() {
                return Err(Error::schema(format!("duplicate message '{}'", message.name)));
            }
        }

        let resolve = |owner: &str, name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                Error::schema(format!("message '{}' references unknown type '{}'", owner, name))
            })
        };

        let mut messages = Vec::with_capacity(def.messages.len());
        for message in def.messages {
            let max_id = message.fields.iter().map(|f| f.id).max().unwrap_or(0);
            let mut fields: Vec<Option<FieldNode>> = vec![None; max_id as usize + 1];

            for field in message.fields {
                if field.id == 0 {
                    return Err(Error::schema(format!(
                        "field '{}.{}' has id 0",
                        message.name, field.name
                    )));
                }
                let ty = match field.ty {
                    TypeRef::Int64 => FieldType::Int64,
                    TypeRef::Int32 => FieldType::Int32,
                    TypeRef::Bool => FieldType::Bool,
                    TypeRef::Enum => FieldType::Enum,
                    TypeRef::Double => FieldType::Double,
                    TypeRef::Fixed64 => FieldType::Fixed64,
                    TypeRef::String => FieldType::String,
                    TypeRef::Bytes => FieldType::Bytes,
                    TypeRef::Message(name) => FieldType::Message(resolve(message.name, name)?),
                    TypeRef::Group(name) => FieldType::Group(resolve(message.name, name)?),
                };
                let slot = &mut fields[field.id as usize];
                if slot.is_some() {
                    return Err(Error::schema(format!(
                        "message '{}' declares field id {} twice",
                        message.name, field.id
                    )));
                }
                *slot = Some(FieldNode {
                    id: field.id,
                    name: field.name,
                    ty,
                    repeated: field.repeated,
                    length_wrapped: field.length_wrapped,
                });
            }

            messages.push(MessageNode {
                name: message.name,
                kind: message.kind,
                fields,
            });
        }

        let root = resolve("<root>", def.root)?;
        Ok(Self {
            package: def.package,
            version: def.version,
            root,
            messages,
        })
    }

    /// The root message node id
    pub fn root(&self) -> MessageId {
        self.root
    }

    /// Returns the node for an id produced by this tree
    #[inline]
    pub fn node(&self, id: MessageId) -> &MessageNode {
        &self.messages[id.0]
    }

    /// Finds a message by name
    pub fn find(&self, name: &str) -> Option<MessageId> {
        self.messages
            .iter()
            .position(|m| m.name == name)
            .map(MessageId)
    }

    /// Protobuf package of the description
    pub fn package(&self) -> &'static str {
        self.package
    }

    /// Revision of the description
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of message nodes
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the tree has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

static ENTITY_TREE: OnceLock<Result<SchemaTree>> = OnceLock::new();

/// The shared entity schema, built on first use.
pub fn entity_schema() -> Result<&'static SchemaTree> {
    match ENTITY_TREE.get_or_init(|| SchemaTree::build(&ENTITY_SCHEMA)) {
        Ok(tree) => Ok(tree),
        Err(e) => Err(Error::schema(e.to_string())),
    }
}
