//! Static description of the `storage_onestore_v3` entity message family.
//!
//! Only the messages reachable from `EntityProto` are described. Group
//! messages (`Path.Element`, the `PropertyValue` variants) share the field id
//! space of their parent on the wire but are decoded against their own node.

use super::{FieldDef, MessageDef, MessageKind, SchemaDef, TypeRef};

const ENTITY_PROTO: &[FieldDef] = &[
    FieldDef::new(4, "kind", TypeRef::Enum),
    FieldDef::new(5, "kindUri", TypeRef::String),
    FieldDef::new(13, "key", TypeRef::Message("Reference")),
    FieldDef::new(14, "property", TypeRef::Message("Property")).repeated(),
    FieldDef::new(15, "rawProperty", TypeRef::Message("Property")).repeated(),
    FieldDef::new(16, "entityGroup", TypeRef::Message("Path")),
    FieldDef::new(17, "owner", TypeRef::Message("User")),
];

const REFERENCE: &[FieldDef] = &[
    FieldDef::new(13, "app", TypeRef::String),
    FieldDef::new(14, "path", TypeRef::Message("Path")),
    FieldDef::new(20, "nameSpace", TypeRef::String),
    FieldDef::new(23, "databaseId", TypeRef::String),
];

const PATH: &[FieldDef] = &[FieldDef::new(1, "element", TypeRef::Group("Path.Element")).repeated()];

const PATH_ELEMENT: &[FieldDef] = &[
    FieldDef::new(2, "type", TypeRef::String),
    FieldDef::new(3, "id", TypeRef::Int64),
    FieldDef::new(4, "name", TypeRef::String),
];

const USER: &[FieldDef] = &[
    FieldDef::new(1, "email", TypeRef::String),
    FieldDef::new(2, "authDomain", TypeRef::String),
    FieldDef::new(3, "nickname", TypeRef::String),
    FieldDef::new(4, "gaiaid", TypeRef::Int64),
    FieldDef::new(5, "obfuscatedGaiaid", TypeRef::String),
    FieldDef::new(6, "federatedIdentity", TypeRef::String),
    FieldDef::new(7, "federatedProvider", TypeRef::String),
];

const PROPERTY: &[FieldDef] = &[
    FieldDef::new(1, "meaning", TypeRef::Enum),
    FieldDef::new(2, "meaningUri", TypeRef::String),
    FieldDef::new(3, "name", TypeRef::String),
    FieldDef::new(4, "multiple", TypeRef::Bool),
    FieldDef::new(5, "value", TypeRef::Message("PropertyValue")).length_wrapped(),
    FieldDef::new(6, "stashed", TypeRef::Int32),
    FieldDef::new(7, "computed", TypeRef::Bool),
];

const PROPERTY_VALUE: &[FieldDef] = &[
    FieldDef::new(1, "int64Value", TypeRef::Int64),
    FieldDef::new(2, "booleanValue", TypeRef::Bool),
    FieldDef::new(3, "stringValue", TypeRef::Bytes),
    FieldDef::new(4, "doubleValue", TypeRef::Double),
    FieldDef::new(5, "pointValue", TypeRef::Group("PropertyValue.PointValue")),
    FieldDef::new(8, "userValue", TypeRef::Group("PropertyValue.UserValue")),
    FieldDef::new(12, "referenceValue", TypeRef::Group("PropertyValue.ReferenceValue")),
];

const POINT_VALUE: &[FieldDef] = &[
    FieldDef::new(6, "x", TypeRef::Double),
    FieldDef::new(7, "y", TypeRef::Double),
];

const USER_VALUE: &[FieldDef] = &[
    FieldDef::new(9, "email", TypeRef::String),
    FieldDef::new(10, "authDomain", TypeRef::String),
    FieldDef::new(11, "nickname", TypeRef::String),
    FieldDef::new(18, "gaiaid", TypeRef::Int64),
    FieldDef::new(19, "obfuscatedGaiaid", TypeRef::String),
    FieldDef::new(21, "federatedIdentity", TypeRef::String),
    FieldDef::new(22, "federatedProvider", TypeRef::String),
];

const REFERENCE_VALUE: &[FieldDef] = &[
    FieldDef::new(13, "app", TypeRef::String),
    FieldDef::new(
        14,
        "pathElement",
        TypeRef::Group("PropertyValue.ReferenceValue.PathElement"),
    )
    .repeated(),
    FieldDef::new(20, "nameSpace", TypeRef::String),
    FieldDef::new(23, "databaseId", TypeRef::String),
];

const REFERENCE_VALUE_PATH_ELEMENT: &[FieldDef] = &[
    FieldDef::new(15, "type", TypeRef::String),
    FieldDef::new(16, "id", TypeRef::Int64),
    FieldDef::new(17, "name", TypeRef::String),
];

/// The entity message family, rooted at `EntityProto`
pub static ENTITY_SCHEMA: SchemaDef = SchemaDef {
    package: "storage_onestore_v3",
    version: 1,
    root: "EntityProto",
    messages: &[
        MessageDef { name: "EntityProto", kind: MessageKind::Entity, fields: ENTITY_PROTO },
        MessageDef { name: "Reference", kind: MessageKind::Plain, fields: REFERENCE },
        MessageDef { name: "Path", kind: MessageKind::Plain, fields: PATH },
        MessageDef { name: "Path.Element", kind: MessageKind::Plain, fields: PATH_ELEMENT },
        MessageDef { name: "User", kind: MessageKind::Plain, fields: USER },
        MessageDef { name: "Property", kind: MessageKind::Property, fields: PROPERTY },
        MessageDef {
            name: "PropertyValue",
            kind: MessageKind::ValueUnion,
            fields: PROPERTY_VALUE,
        },
        MessageDef {
            name: "PropertyValue.PointValue",
            kind: MessageKind::Plain,
            fields: POINT_VALUE,
        },
        MessageDef {
            name: "PropertyValue.UserValue",
            kind: MessageKind::Plain,
            fields: USER_VALUE,
        },
        MessageDef {
            name: "PropertyValue.ReferenceValue",
            kind: MessageKind::Plain,
            fields: REFERENCE_VALUE,
        },
        MessageDef {
            name: "PropertyValue.ReferenceValue.PathElement",
            kind: MessageKind::Plain,
            fields: REFERENCE_VALUE_PATH_ELEMENT,
        },
    ],
};

/// `Property.meaning` annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Meaning {
    /// No special interpretation
    NoMeaning,
    /// Atom category
    AtomCategory,
    /// Atom link
    AtomLink,
    /// Atom title
    AtomTitle,
    /// Atom content
    AtomContent,
    /// Atom summary
    AtomSummary,
    /// Atom author
    AtomAuthor,
    /// Timestamp in microseconds
    GdWhen,
    /// Email address
    GdEmail,
    /// Geo point
    GeorssPoint,
    /// Instant messaging handle
    GdIm,
    /// Phone number
    GdPhoneNumber,
    /// Postal address
    GdPostalAddress,
    /// Rating
    GdRating,
    /// Unindexed binary
    Blob,
    /// Unindexed text
    Text,
    /// Indexed short binary
    ByteString,
    /// Blobstore key
    BlobKey,
    /// Index value
    IndexValue,
    /// The value bytes are a serialized `EntityProto`
    EntityProto,
    /// An empty array
    EmptyList,
    /// Any other value
    Other(i64),
}

impl From<i64> for Meaning {
    fn from(value: i64) -> Self {
        match value {
            0 => Meaning::NoMeaning,
            1 => Meaning::AtomCategory,
            2 => Meaning::AtomLink,
            3 => Meaning::AtomTitle,
            4 => Meaning::AtomContent,
            5 => Meaning::AtomSummary,
            6 => Meaning::AtomAuthor,
            7 => Meaning::GdWhen,
            8 => Meaning::GdEmail,
            9 => Meaning::GeorssPoint,
            10 => Meaning::GdIm,
            11 => Meaning::GdPhoneNumber,
            12 => Meaning::GdPostalAddress,
            13 => Meaning::GdRating,
            14 => Meaning::Blob,
            15 => Meaning::Text,
            16 => Meaning::ByteString,
            17 => Meaning::BlobKey,
            18 => Meaning::IndexValue,
            19 => Meaning::EntityProto,
            24 => Meaning::EmptyList,
            other => Meaning::Other(other),
        }
    }
}

impl From<Meaning> for i64 {
    fn from(meaning: Meaning) -> Self {
        match meaning {
            Meaning::NoMeaning => 0,
            Meaning::AtomCategory => 1,
            Meaning::AtomLink => 2,
            Meaning::AtomTitle => 3,
            Meaning::AtomContent => 4,
            Meaning::AtomSummary => 5,
            Meaning::AtomAuthor => 6,
            Meaning::GdWhen => 7,
            Meaning::GdEmail => 8,
            Meaning::GeorssPoint => 9,
            Meaning::GdIm => 10,
            Meaning::GdPhoneNumber => 11,
            Meaning::GdPostalAddress => 12,
            Meaning::GdRating => 13,
            Meaning::Blob => 14,
            Meaning::Text => 15,
            Meaning::ByteString => 16,
            Meaning::BlobKey => 17,
            Meaning::IndexValue => 18,
            Meaning::EntityProto => 19,
            Meaning::EmptyList => 24,
            Meaning::Other(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meaning_codes() {
        assert_eq!(Meaning::from(19), Meaning::EntityProto);
        assert_eq!(Meaning::from(24), Meaning::EmptyList);
        assert_eq!(Meaning::from(0), Meaning::NoMeaning);
        assert_eq!(Meaning::from(99), Meaning::Other(99));
        for code in 0..=24 {
            assert_eq!(i64::from(Meaning::from(code)), code);
        }
    }
}
