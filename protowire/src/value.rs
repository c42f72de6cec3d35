//! Typed field values and their wire encodings.

use wirebuf::{length_prefixed, pack_helper, unzigzag, v64, zigzag, CodedInput, Packable};

use super::{DynamicMessage, Error, FieldNumber, FieldType, Tag, WireType};

/////////////////////////////////////////////// Value //////////////////////////////////////////////

/// Value is one value of a field.  The variant fixes the Rust representation; the field's
/// [FieldType] fixes the encoding, so `I32` serves int32, sint32, and sfixed32 alike.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
    Message(DynamicMessage),
}

impl Value {
    /// True when this variant can carry a value of `field_type`.
    pub fn is_compatible(&self, field_type: FieldType) -> bool {
        matches!(
            (field_type, self),
            (FieldType::Double, Value::F64(_))
                | (FieldType::Float, Value::F32(_))
                | (
                    FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64,
                    Value::I64(_)
                )
                | (FieldType::UInt64 | FieldType::Fixed64, Value::U64(_))
                | (
                    FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32,
                    Value::I32(_)
                )
                | (FieldType::UInt32 | FieldType::Fixed32, Value::U32(_))
                | (FieldType::Bool, Value::Bool(_))
                | (FieldType::Enum, Value::Enum(_))
                | (FieldType::String, Value::String(_))
                | (FieldType::Bytes, Value::Bytes(_))
                | (FieldType::Message | FieldType::Group, Value::Message(_))
        )
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

////////////////////////////////////////////// Scalar //////////////////////////////////////////////

/// The raw wire word for a scalar value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Scalar {
    Varint(v64),
    Fixed32(u32),
    Fixed64(u64),
}

impl Scalar {
    /// Encode `value` as `field_type`.  `None` for non-scalar types and mismatched values.
    pub(crate) fn encode(field_type: FieldType, value: &Value) -> Option<Scalar> {
        let scalar = match (field_type, value) {
            // negative int32 and enum values sign-extend to ten bytes
            (FieldType::Int32, Value::I32(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::Enum, Value::Enum(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::Int64, Value::I64(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::UInt32, Value::U32(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::UInt64, Value::U64(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::SInt32, Value::I32(x)) => Scalar::Varint(v64::from(zigzag(*x as i64))),
            (FieldType::SInt64, Value::I64(x)) => Scalar::Varint(v64::from(zigzag(*x))),
            (FieldType::Bool, Value::Bool(x)) => Scalar::Varint(v64::from(*x)),
            (FieldType::Fixed32, Value::U32(x)) => Scalar::Fixed32(*x),
            (FieldType::SFixed32, Value::I32(x)) => Scalar::Fixed32(*x as u32),
            (FieldType::Float, Value::F32(x)) => Scalar::Fixed32(x.to_bits()),
            (FieldType::Fixed64, Value::U64(x)) => Scalar::Fixed64(*x),
            (FieldType::SFixed64, Value::I64(x)) => Scalar::Fixed64(*x as u64),
            (FieldType::Double, Value::F64(x)) => Scalar::Fixed64(x.to_bits()),
            _ => {
                return None;
            }
        };
        Some(scalar)
    }

    /// Read one scalar of `field_type` from `input`.
    pub(crate) fn read(
        field_type: FieldType,
        field_number: FieldNumber,
        input: &mut CodedInput<'_>,
    ) -> Result<Value, Error> {
        let value = match field_type {
            // int32 and uint32 keep the low 32 bits of whatever varint arrives
            FieldType::Int32 => Value::I32(input.read_varint()? as i32),
            FieldType::Int64 => Value::I64(input.read_varint()? as i64),
            FieldType::UInt32 => Value::U32(input.read_varint()? as u32),
            FieldType::UInt64 => Value::U64(input.read_varint()?),
            FieldType::SInt32 => Value::I32(unzigzag(input.read_varint()? as u32 as u64) as i32),
            FieldType::SInt64 => Value::I64(unzigzag(input.read_varint()?)),
            FieldType::Bool => Value::Bool(input.read_varint()? != 0),
            FieldType::Enum => Value::Enum(input.read_varint()? as i32),
            FieldType::Fixed32 => Value::U32(input.read_fixed32()?),
            FieldType::SFixed32 => Value::I32(input.read_fixed32()? as i32),
            FieldType::Float => Value::F32(f32::from_bits(input.read_fixed32()?)),
            FieldType::Fixed64 => Value::U64(input.read_fixed64()?),
            FieldType::SFixed64 => Value::I64(input.read_fixed64()? as i64),
            FieldType::Double => Value::F64(f64::from_bits(input.read_fixed64()?)),
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group => {
                return Err(Error::WireTypeMismatch {
                    field_number: field_number.get(),
                    expected: field_type.wire_type(),
                    got: WireType::LengthDelimited,
                });
            }
        };
        Ok(value)
    }
}

impl Packable for Scalar {
    fn pack_sz(&self) -> usize {
        match self {
            Scalar::Varint(v) => v.pack_sz(),
            Scalar::Fixed32(_) => 4,
            Scalar::Fixed64(_) => 8,
        }
    }

    fn pack(&self, out: &mut [u8]) {
        match self {
            Scalar::Varint(v) => v.pack(out),
            Scalar::Fixed32(x) => x.pack(out),
            Scalar::Fixed64(x) => x.pack(out),
        }
    }
}

////////////////////////////////////////////// Payload /////////////////////////////////////////////

// Everything that follows a tag.
enum Payload<'a> {
    Scalar(Scalar),
    Bytes(&'a [u8]),
    Message(&'a DynamicMessage),
    // The group's fields; the end tag is written by the entry.
    Group(&'a DynamicMessage),
    Nothing,
}

impl<'a> Payload<'a> {
    fn new(field_type: FieldType, value: &'a Value) -> Self {
        match (field_type, value) {
            (FieldType::String, Value::String(s)) => Payload::Bytes(s.as_bytes()),
            (FieldType::Bytes, Value::Bytes(b)) => Payload::Bytes(b),
            (FieldType::Message, Value::Message(m)) => Payload::Message(m),
            (FieldType::Group, Value::Message(m)) => Payload::Group(m),
            _ => match Scalar::encode(field_type, value) {
                Some(scalar) => Payload::Scalar(scalar),
                None => {
                    // builders check every value against its field
                    debug_assert!(false, "value does not fit {:?}", field_type);
                    Payload::Nothing
                }
            },
        }
    }
}

impl Packable for Payload<'_> {
    fn pack_sz(&self) -> usize {
        match self {
            Payload::Scalar(s) => s.pack_sz(),
            Payload::Bytes(b) => b.pack_sz(),
            Payload::Message(m) => {
                let sz = m.pack_sz();
                v64::from(sz).pack_sz() + sz
            }
            Payload::Group(m) => m.pack_sz(),
            Payload::Nothing => 0,
        }
    }

    fn pack(&self, out: &mut [u8]) {
        match self {
            Payload::Scalar(s) => s.pack(out),
            Payload::Bytes(b) => b.pack(out),
            Payload::Message(m) => length_prefixed(*m).pack(out),
            Payload::Group(m) => m.pack(out),
            Payload::Nothing => {}
        }
    }
}

/////////////////////////////////////////// ValuePacker ////////////////////////////////////////////

/// ValuePacker writes one tagged value:  the tag, the payload, and for groups the end tag.
pub(crate) struct ValuePacker<'a> {
    field_number: FieldNumber,
    field_type: FieldType,
    value: &'a Value,
}

impl<'a> ValuePacker<'a> {
    pub(crate) fn new(field_number: FieldNumber, field_type: FieldType, value: &'a Value) -> Self {
        Self {
            field_number,
            field_type,
            value,
        }
    }

    fn tag(&self, wire_type: WireType) -> Tag {
        Tag {
            field_number: self.field_number,
            wire_type,
        }
    }

    fn end_group(&self) -> Option<Tag> {
        if self.field_type == FieldType::Group {
            Some(self.tag(WireType::EndGroup))
        } else {
            None
        }
    }
}

impl Packable for ValuePacker<'_> {
    fn pack_sz(&self) -> usize {
        self.tag(self.field_type.wire_type()).pack_sz()
            + Payload::new(self.field_type, self.value).pack_sz()
            + self.end_group().map(|t| t.pack_sz()).unwrap_or(0)
    }

    fn pack(&self, out: &mut [u8]) {
        let out = pack_helper(self.tag(self.field_type.wire_type()), out);
        let out = pack_helper(Payload::new(self.field_type, self.value), out);
        if let Some(end) = self.end_group() {
            pack_helper(end, out);
        }
    }
}

/////////////////////////////////////////// PackedPacker ///////////////////////////////////////////

/// PackedPacker writes a repeated scalar field as one length-delimited run.  No values, no bytes.
pub(crate) struct PackedPacker<'a> {
    field_number: FieldNumber,
    field_type: FieldType,
    values: &'a [Value],
}

impl<'a> PackedPacker<'a> {
    pub(crate) fn new(
        field_number: FieldNumber,
        field_type: FieldType,
        values: &'a [Value],
    ) -> Self {
        Self {
            field_number,
            field_type,
            values,
        }
    }

    fn body_sz(&self) -> usize {
        self.values
            .iter()
            .filter_map(|v| Scalar::encode(self.field_type, v))
            .map(|s| s.pack_sz())
            .sum()
    }
}

impl Packable for PackedPacker<'_> {
    fn pack_sz(&self) -> usize {
        if self.values.is_empty() {
            return 0;
        }
        let tag = Tag {
            field_number: self.field_number,
            wire_type: WireType::LengthDelimited,
        };
        let body = self.body_sz();
        tag.pack_sz() + v64::from(body).pack_sz() + body
    }

    fn pack(&self, out: &mut [u8]) {
        if self.values.is_empty() {
            return;
        }
        let tag = Tag {
            field_number: self.field_number,
            wire_type: WireType::LengthDelimited,
        };
        let mut out = pack_helper(tag, out);
        out = pack_helper(v64::from(self.body_sz()), out);
        for scalar in self
            .values
            .iter()
            .filter_map(|v| Scalar::encode(self.field_type, v))
        {
            out = pack_helper(scalar, out);
        }
    }
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////
