//! Dynamic messages, their builders, and the capability traits every message type offers.

use std::collections::BTreeMap;
use std::sync::Arc;

use wirebuf::{stack_pack, Packable};

use super::codec::{merge_from_slice, ParseOptions};
use super::{
    Error, ExtensionDescriptor, ExtensionRegistry, FieldDescriptor, MessageDescriptor,
    UnknownFieldSet, Value, MESSAGES_SERIALIZED,
};

////////////////////////////////////////////// Message /////////////////////////////////////////////

/// Message is what the codec needs from any message type.
pub trait Message: Packable + Sized {
    type Builder: Builder<Message = Self>;

    /// The type this message is an instance of.
    fn descriptor(&self) -> &Arc<MessageDescriptor>;

    /// An empty builder for this message's type.
    fn new_builder(&self) -> Self::Builder;

    fn unknown_fields(&self) -> &UnknownFieldSet;

    /// Exactly `self.serialize().len()`.
    fn serialized_size(&self) -> usize {
        self.pack_sz()
    }

    fn serialize(&self) -> Vec<u8> {
        MESSAGES_SERIALIZED.click();
        stack_pack(self).to_vec()
    }

    /// Write the serialized message to `writer`, returning the number of bytes written.
    fn write_to<W: std::io::Write>(&self, writer: &mut W) -> Result<usize, std::io::Error> {
        MESSAGES_SERIALIZED.click();
        self.stream(writer)
    }
}

////////////////////////////////////////////// Builder /////////////////////////////////////////////

/// Builder accumulates the state of one message and then yields it.
pub trait Builder: Sized {
    type Message: Message;

    /// Parse `buf` and merge its fields into the message under construction.
    fn merge_from_bytes(&mut self, buf: &[u8], registry: &ExtensionRegistry) -> Result<(), Error>;

    /// Read `reader` to its end and merge what it held.  Parse errors surface as
    /// [std::io::ErrorKind::InvalidData].
    fn merge_from_reader<R: std::io::Read>(
        &mut self,
        reader: &mut R,
        registry: &ExtensionRegistry,
    ) -> Result<(), std::io::Error> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.merge_from_bytes(&buf, registry)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    /// Merge a built message of the same type.
    fn merge_from_message(&mut self, msg: &Self::Message) -> Result<(), Error>;

    fn build(self) -> Self::Message;
}

///////////////////////////////////////////// FieldValue ////////////////////////////////////////////

/// The value(s) held for one field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Single(Value),
    Repeated(Vec<Value>),
}

impl FieldValue {
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            FieldValue::Single(v) => Some(v),
            FieldValue::Repeated(_) => None,
        }
    }

    pub fn as_repeated(&self) -> Option<&[Value]> {
        match self {
            FieldValue::Single(_) => None,
            FieldValue::Repeated(vs) => Some(vs),
        }
    }

    // Append when repeated; overwrite when singular.  Singular messages merge instead.
    fn merge_from(&mut self, other: &FieldValue) -> Result<(), Error> {
        match (self, other) {
            (FieldValue::Repeated(ours), FieldValue::Repeated(theirs)) => {
                ours.extend(theirs.iter().cloned());
            }
            (
                FieldValue::Single(Value::Message(ours)),
                FieldValue::Single(Value::Message(theirs)),
            ) => {
                ours.merge_from(theirs)?;
            }
            (ours, theirs) => {
                *ours = theirs.clone();
            }
        }
        Ok(())
    }
}

/////////////////////////////////////////// ExtensionField //////////////////////////////////////////

/// A set extension and the descriptor it was set or parsed with.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionField {
    pub(crate) descriptor: Arc<ExtensionDescriptor>,
    pub(crate) value: FieldValue,
}

impl ExtensionField {
    pub fn descriptor(&self) -> &Arc<ExtensionDescriptor> {
        &self.descriptor
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

/////////////////////////////////////////// DynamicMessage //////////////////////////////////////////

/// DynamicMessage holds the fields of any message type:  known fields by number, set extensions
/// by number, and the fields neither of those account for.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicMessage {
    pub(crate) descriptor: Arc<MessageDescriptor>,
    pub(crate) fields: BTreeMap<u32, FieldValue>,
    pub(crate) extensions: BTreeMap<u32, ExtensionField>,
    pub(crate) unknown: UnknownFieldSet,
}

impl DynamicMessage {
    /// An empty message of type `descriptor`.
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        Self {
            descriptor,
            fields: BTreeMap::new(),
            extensions: BTreeMap::new(),
            unknown: UnknownFieldSet::new(),
        }
    }

    /// A builder seeded with a copy of this message.
    pub fn to_builder(&self) -> MessageBuilder {
        MessageBuilder {
            message: self.clone(),
        }
    }

    pub fn get_field(&self, number: u32) -> Option<&FieldValue> {
        self.fields.get(&number)
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<&FieldValue> {
        let field = self.descriptor.field_by_name(name)?;
        self.fields.get(&field.number().get())
    }

    pub fn has_field(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Set known fields, ascending by number.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &FieldValue)> {
        self.fields
            .iter()
            .filter_map(|(n, v)| self.descriptor.field(*n).map(|f| (f, v)))
    }

    pub fn get_extension(&self, number: u32) -> Option<&FieldValue> {
        self.extensions.get(&number).map(|e| &e.value)
    }

    pub fn has_extension(&self, number: u32) -> bool {
        self.extensions.contains_key(&number)
    }

    /// Set extensions, ascending by number.
    pub fn extensions(&self) -> impl Iterator<Item = &ExtensionField> {
        self.extensions.values()
    }

    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    // Merge `other` into `self` with protobuf semantics.
    pub(crate) fn merge_from(&mut self, other: &DynamicMessage) -> Result<(), Error> {
        if self.descriptor.full_name() != other.descriptor.full_name() {
            return Err(Error::MessageTypeMismatch {
                expected: self.descriptor.full_name().to_string(),
                got: other.descriptor.full_name().to_string(),
            });
        }
        for (number, value) in other.fields.iter() {
            match self.fields.get_mut(number) {
                Some(ours) => ours.merge_from(value)?,
                None => {
                    self.fields.insert(*number, value.clone());
                }
            }
        }
        for (number, ext) in other.extensions.iter() {
            match self.extensions.get_mut(number) {
                Some(ours) => ours.value.merge_from(&ext.value)?,
                None => {
                    self.extensions.insert(*number, ext.clone());
                }
            }
        }
        self.unknown.merge_from(&other.unknown);
        Ok(())
    }

    // Drop repeated fields that ended up with no values, recursively.
    fn normalize(&mut self) {
        fn normalize_value(value: &mut FieldValue) {
            match value {
                FieldValue::Single(Value::Message(m)) => m.normalize(),
                FieldValue::Single(_) => {}
                FieldValue::Repeated(vs) => {
                    for v in vs.iter_mut() {
                        if let Value::Message(m) = v {
                            m.normalize();
                        }
                    }
                }
            }
        }
        fn is_empty(value: &FieldValue) -> bool {
            matches!(value, FieldValue::Repeated(vs) if vs.is_empty())
        }
        self.fields.retain(|_, v| !is_empty(v));
        self.extensions.retain(|_, e| !is_empty(&e.value));
        for value in self.fields.values_mut() {
            normalize_value(value);
        }
        for ext in self.extensions.values_mut() {
            normalize_value(&mut ext.value);
        }
    }
}

impl Message for DynamicMessage {
    type Builder = MessageBuilder;

    fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    fn new_builder(&self) -> MessageBuilder {
        MessageBuilder::new(Arc::clone(&self.descriptor))
    }

    fn unknown_fields(&self) -> &UnknownFieldSet {
        &self.unknown
    }
}

/////////////////////////////////////////// MessageBuilder //////////////////////////////////////////

/// MessageBuilder is the owning builder for a [DynamicMessage].  Every value is checked against
/// its field's type and cardinality on the way in.
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    message: DynamicMessage,
}

impl MessageBuilder {
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        Self {
            message: DynamicMessage::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.message.descriptor
    }

    fn known_field(&self, number: u32) -> Result<&FieldDescriptor, Error> {
        self.message
            .descriptor
            .field(number)
            .ok_or_else(|| Error::NoSuchField {
                message: self.message.descriptor.full_name().to_string(),
                field_number: number,
            })
    }

    /// Set singular field `number`.
    pub fn set_field(&mut self, number: u32, value: Value) -> Result<&mut Self, Error> {
        let field = self.known_field(number)?;
        check_value(field, &value, false)?;
        self.message.fields.insert(number, FieldValue::Single(value));
        Ok(self)
    }

    /// Append to repeated field `number`.
    pub fn add_repeated(&mut self, number: u32, value: Value) -> Result<&mut Self, Error> {
        let field = self.known_field(number)?;
        check_value(field, &value, true)?;
        push(self.message.fields.entry(number).or_insert_with(empty), value);
        Ok(self)
    }

    pub fn clear_field(&mut self, number: u32) -> &mut Self {
        self.message.fields.remove(&number);
        self
    }

    fn check_extension(&self, extension: &ExtensionDescriptor) -> Result<(), Error> {
        if extension.extendee() != self.message.descriptor.full_name() {
            return Err(Error::MessageTypeMismatch {
                expected: self.message.descriptor.full_name().to_string(),
                got: extension.extendee().to_string(),
            });
        }
        if let Some(existing) = self.message.extensions.get(&extension.number()) {
            if *existing.descriptor != *extension {
                return Err(Error::DuplicateExtension {
                    extendee: extension.extendee().to_string(),
                    field_number: extension.number(),
                });
            }
        }
        Ok(())
    }

    /// Set singular extension `extension`.
    pub fn set_extension(
        &mut self,
        extension: &Arc<ExtensionDescriptor>,
        value: Value,
    ) -> Result<&mut Self, Error> {
        self.check_extension(extension)?;
        check_value(extension.field(), &value, false)?;
        self.message.extensions.insert(
            extension.number(),
            ExtensionField {
                descriptor: Arc::clone(extension),
                value: FieldValue::Single(value),
            },
        );
        Ok(self)
    }

    /// Append to repeated extension `extension`.
    pub fn add_extension(
        &mut self,
        extension: &Arc<ExtensionDescriptor>,
        value: Value,
    ) -> Result<&mut Self, Error> {
        self.check_extension(extension)?;
        check_value(extension.field(), &value, true)?;
        let entry = self
            .message
            .extensions
            .entry(extension.number())
            .or_insert_with(|| ExtensionField {
                descriptor: Arc::clone(extension),
                value: empty(),
            });
        push(&mut entry.value, value);
        Ok(self)
    }

    /// Replace the unknown fields wholesale.
    pub fn set_unknown_fields(&mut self, unknown: UnknownFieldSet) -> &mut Self {
        self.message.unknown = unknown;
        self
    }

    /// Concatenate `unknown` onto the unknown fields.
    pub fn merge_unknown_fields(&mut self, unknown: &UnknownFieldSet) -> &mut Self {
        self.message.unknown.merge_from(unknown);
        self
    }

    /// Merge a message of the same type:  singular fields overwrite, singular messages merge,
    /// repeated fields and unknown fields append.
    pub fn merge_from(&mut self, other: &DynamicMessage) -> Result<&mut Self, Error> {
        self.message.merge_from(other)?;
        Ok(self)
    }

    /// Parse `buf` into the message under construction.  A failed parse may leave some of its
    /// fields merged.
    pub fn merge_from_bytes(
        &mut self,
        buf: &[u8],
        registry: &ExtensionRegistry,
    ) -> Result<&mut Self, Error> {
        self.merge_from_bytes_with_options(buf, registry, &ParseOptions::default())
    }

    pub fn merge_from_bytes_with_options(
        &mut self,
        buf: &[u8],
        registry: &ExtensionRegistry,
        options: &ParseOptions,
    ) -> Result<&mut Self, Error> {
        merge_from_slice(&mut self.message, buf, registry, options)?;
        Ok(self)
    }

    pub fn build(mut self) -> DynamicMessage {
        self.message.normalize();
        self.message
    }
}

impl Builder for MessageBuilder {
    type Message = DynamicMessage;

    fn merge_from_bytes(&mut self, buf: &[u8], registry: &ExtensionRegistry) -> Result<(), Error> {
        MessageBuilder::merge_from_bytes(self, buf, registry).map(|_| ())
    }

    fn merge_from_message(&mut self, msg: &DynamicMessage) -> Result<(), Error> {
        MessageBuilder::merge_from(self, msg).map(|_| ())
    }

    fn build(self) -> DynamicMessage {
        MessageBuilder::build(self)
    }
}

fn empty() -> FieldValue {
    FieldValue::Repeated(Vec::new())
}

fn push(slot: &mut FieldValue, value: Value) {
    match slot {
        FieldValue::Repeated(vs) => vs.push(value),
        FieldValue::Single(_) => *slot = FieldValue::Repeated(vec![value]),
    }
}

fn check_value(field: &FieldDescriptor, value: &Value, repeated: bool) -> Result<(), Error> {
    let number = field.number().get();
    if field.is_repeated() != repeated {
        return Err(Error::CardinalityMismatch {
            field_number: number,
            what: if repeated {
                "cannot add to a singular field"
            } else {
                "cannot set a repeated field"
            },
        });
    }
    if !value.is_compatible(field.field_type()) {
        return Err(Error::ValueTypeMismatch {
            field_number: number,
            expected: field.field_type(),
        });
    }
    if let (Value::Message(m), Some(expected)) = (value, field.message_type()) {
        if m.descriptor.full_name() != expected.full_name() {
            return Err(Error::MessageTypeMismatch {
                expected: expected.full_name().to_string(),
                got: m.descriptor.full_name().to_string(),
            });
        }
    }
    Ok(())
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cardinality, FieldType};

    fn nested() -> Arc<MessageDescriptor> {
        MessageDescriptor::builder("test.Nested")
            .field(FieldDescriptor::new(1, "a", FieldType::Int32, Cardinality::Optional).unwrap())
            .field(FieldDescriptor::new(2, "b", FieldType::Int32, Cardinality::Optional).unwrap())
            .build()
            .unwrap()
    }

    fn outer() -> Arc<MessageDescriptor> {
        MessageDescriptor::builder("test.Outer")
            .field(FieldDescriptor::new(1, "x", FieldType::Int64, Cardinality::Optional).unwrap())
            .field(FieldDescriptor::new(2, "r", FieldType::String, Cardinality::Repeated).unwrap())
            .field(FieldDescriptor::new_message(3, "m", Cardinality::Optional, &nested()).unwrap())
            .build()
            .unwrap()
    }

    fn nested_with(number: u32, x: i32) -> DynamicMessage {
        let mut b = MessageBuilder::new(nested());
        b.set_field(number, Value::I32(x)).unwrap();
        b.build()
    }

    #[test]
    fn set_and_get() {
        let mut b = MessageBuilder::new(outer());
        b.set_field(1, Value::I64(-5))
            .unwrap()
            .add_repeated(2, Value::String("a".into()))
            .unwrap()
            .add_repeated(2, Value::String("b".into()))
            .unwrap();
        let m = b.build();
        assert_eq!(Some(&FieldValue::Single(Value::I64(-5))), m.get_field(1));
        assert_eq!(
            Some(&[Value::String("a".into()), Value::String("b".into())][..]),
            m.get_field_by_name("r").and_then(FieldValue::as_repeated)
        );
        assert!(!m.has_field(3));
    }

    #[test]
    fn builder_checks_values() {
        let mut b = MessageBuilder::new(outer());
        assert_eq!(
            Err(Error::ValueTypeMismatch {
                field_number: 1,
                expected: FieldType::Int64
            }),
            b.set_field(1, Value::I32(1)).map(|_| ())
        );
        assert!(matches!(
            b.set_field(2, Value::String("x".into())),
            Err(Error::CardinalityMismatch { field_number: 2, .. })
        ));
        assert!(matches!(
            b.add_repeated(1, Value::I64(1)),
            Err(Error::CardinalityMismatch { field_number: 1, .. })
        ));
        assert!(matches!(
            b.set_field(9, Value::I64(1)),
            Err(Error::NoSuchField { field_number: 9, .. })
        ));
        let wrong = MessageBuilder::new(outer()).build();
        assert!(matches!(
            b.set_field(3, Value::Message(wrong)),
            Err(Error::MessageTypeMismatch { .. })
        ));
    }

    #[test]
    fn merge_semantics() {
        let mut a = MessageBuilder::new(outer());
        a.set_field(1, Value::I64(1))
            .unwrap()
            .add_repeated(2, Value::String("a".into()))
            .unwrap()
            .set_field(3, Value::Message(nested_with(1, 10)))
            .unwrap();
        let mut b = MessageBuilder::new(outer());
        b.set_field(1, Value::I64(2))
            .unwrap()
            .add_repeated(2, Value::String("b".into()))
            .unwrap()
            .set_field(3, Value::Message(nested_with(2, 20)))
            .unwrap();
        let b = b.build();
        a.merge_from(&b).unwrap();
        let m = a.build();
        assert_eq!(Some(&FieldValue::Single(Value::I64(2))), m.get_field(1));
        assert_eq!(2, m.get_field(2).and_then(FieldValue::as_repeated).unwrap().len());
        let inner = m
            .get_field(3)
            .and_then(FieldValue::as_single)
            .and_then(Value::as_message)
            .unwrap();
        assert_eq!(Some(&FieldValue::Single(Value::I32(10))), inner.get_field(1));
        assert_eq!(Some(&FieldValue::Single(Value::I32(20))), inner.get_field(2));
    }

    #[test]
    fn merge_rejects_other_types() {
        let mut a = MessageBuilder::new(outer());
        assert!(matches!(
            a.merge_from(&nested_with(1, 1)),
            Err(Error::MessageTypeMismatch { .. })
        ));
    }

    #[test]
    fn clear_and_unknown() {
        let mut unknown = UnknownFieldSet::new();
        unknown.merge_varint(crate::FieldNumber::new(99).unwrap(), 7);
        let mut b = MessageBuilder::new(outer());
        b.set_field(1, Value::I64(1)).unwrap();
        b.clear_field(1).set_unknown_fields(unknown.clone());
        b.merge_unknown_fields(&unknown);
        let m = b.build();
        assert!(!m.has_field(1));
        assert_eq!(&[7, 7], m.unknown_fields().get(99).unwrap().varint());
    }

    #[test]
    fn to_builder_copies() {
        let m = nested_with(1, 3);
        let mut b = m.to_builder();
        b.set_field(2, Value::I32(4)).unwrap();
        let n = b.build();
        assert_eq!(m.get_field(1), n.get_field(1));
        assert!(!m.has_field(2));
        assert!(n.has_field(2));
    }

    #[test]
    fn merge_from_reader_parses_and_reports() {
        let mut b = MessageBuilder::new(nested());
        let mut reader: &[u8] = &[0x08, 0x05, 0x10, 0x06];
        Builder::merge_from_reader(&mut b, &mut reader, ExtensionRegistry::empty()).unwrap();
        let m = b.build();
        assert_eq!(m, {
            let mut b = MessageBuilder::new(nested());
            b.set_field(1, Value::I32(5)).unwrap().set_field(2, Value::I32(6)).unwrap();
            b.build()
        });

        let mut b = MessageBuilder::new(nested());
        let mut truncated: &[u8] = &[0x08];
        let err = Builder::merge_from_reader(&mut b, &mut truncated, ExtensionRegistry::empty())
            .unwrap_err();
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind());
    }
}
