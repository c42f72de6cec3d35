//! The logical field types a schema may declare and the one table mapping them onto wire types.

use super::WireType;

///////////////////////////////////////////// FieldType ////////////////////////////////////////////

/// FieldType is the closed set of logical types a field can have.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    UInt64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    UInt32,
    Enum,
    SFixed32,
    SFixed64,
    SInt32,
    SInt64,
}

impl FieldType {
    /// Every field type.
    pub const ALL: [FieldType; 18] = [
        FieldType::Double,
        FieldType::Float,
        FieldType::Int64,
        FieldType::UInt64,
        FieldType::Int32,
        FieldType::Fixed64,
        FieldType::Fixed32,
        FieldType::Bool,
        FieldType::String,
        FieldType::Group,
        FieldType::Message,
        FieldType::Bytes,
        FieldType::UInt32,
        FieldType::Enum,
        FieldType::SFixed32,
        FieldType::SFixed64,
        FieldType::SInt32,
        FieldType::SInt64,
    ];

    /// The wire type a single value of this type is written with.
    pub fn wire_type(self) -> WireType {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::SInt32
            | FieldType::SInt64
            | FieldType::Bool
            | FieldType::Enum => WireType::Varint,
            FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => WireType::SixtyFour,
            FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => WireType::ThirtyTwo,
            FieldType::String | FieldType::Bytes | FieldType::Message => {
                WireType::LengthDelimited
            }
            FieldType::Group => WireType::StartGroup,
        }
    }

    /// True when repeated values of this type may be written as one packed run.
    pub fn is_packable(self) -> bool {
        matches!(
            self.wire_type(),
            WireType::Varint | WireType::SixtyFour | WireType::ThirtyTwo
        )
    }

    /// The type's name as it appears in a schema.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Int32 => "int32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Group => "group",
            FieldType::Message => "message",
            FieldType::Bytes => "bytes",
            FieldType::UInt32 => "uint32",
            FieldType::Enum => "enum",
            FieldType::SFixed32 => "sfixed32",
            FieldType::SFixed64 => "sfixed64",
            FieldType::SInt32 => "sint32",
            FieldType::SInt64 => "sint64",
        }
    }
}

//////////////////////////////////////////// Cardinality ///////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Cardinality {
    Optional,
    Required,
    Repeated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_types() {
        let expected = [
            (FieldType::Double, WireType::SixtyFour),
            (FieldType::Float, WireType::ThirtyTwo),
            (FieldType::Int64, WireType::Varint),
            (FieldType::UInt64, WireType::Varint),
            (FieldType::Int32, WireType::Varint),
            (FieldType::Fixed64, WireType::SixtyFour),
            (FieldType::Fixed32, WireType::ThirtyTwo),
            (FieldType::Bool, WireType::Varint),
            (FieldType::String, WireType::LengthDelimited),
            (FieldType::Group, WireType::StartGroup),
            (FieldType::Message, WireType::LengthDelimited),
            (FieldType::Bytes, WireType::LengthDelimited),
            (FieldType::UInt32, WireType::Varint),
            (FieldType::Enum, WireType::Varint),
            (FieldType::SFixed32, WireType::ThirtyTwo),
            (FieldType::SFixed64, WireType::SixtyFour),
            (FieldType::SInt32, WireType::Varint),
            (FieldType::SInt64, WireType::Varint),
        ];
        assert_eq!(FieldType::ALL.len(), expected.len());
        for (field_type, wire_type) in expected {
            assert_eq!(
                wire_type,
                field_type.wire_type(),
                "human got {} wrong?",
                field_type.name()
            );
        }
    }

    #[test]
    fn packable() {
        let not_packable = [
            FieldType::String,
            FieldType::Bytes,
            FieldType::Message,
            FieldType::Group,
        ];
        for field_type in FieldType::ALL {
            assert_eq!(
                !not_packable.contains(&field_type),
                field_type.is_packable(),
                "human got {} wrong?",
                field_type.name()
            );
        }
    }

    #[test]
    fn no_field_type_uses_end_group() {
        for field_type in FieldType::ALL {
            assert_ne!(WireType::EndGroup, field_type.wire_type());
        }
    }
}
