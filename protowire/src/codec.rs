//! The message codec.
//!
//! Writing gathers three sources (known fields, set extensions, and unknown fields) into one
//! sequence ordered by field number and packs it.  Reading loops over tags, dispatching each one
//! to the schema, then the extension registry, then the unknown field store.

use std::sync::Arc;

use wirebuf::{pack_helper, CodedInput, Packable, DEFAULT_RECURSION_LIMIT};

use super::message::{ExtensionField, FieldValue};
use super::message_set::{self, ItemPacker, ITEM_FIELD};
use super::unknown::UnknownField;
use super::value::{PackedPacker, Scalar, ValuePacker};
use super::{
    next_tag, DynamicMessage, Error, ExtensionRegistry, FieldDescriptor, FieldNumber, FieldType,
    Tag, Value, WireType, EXTENSIONS_RESOLVED, MESSAGES_PARSED, UNKNOWN_FIELDS,
};

/////////////////////////////////////////// ParseOptions ///////////////////////////////////////////

/// Knobs for a single parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseOptions {
    /// How many nested messages and groups a parse may descend through.
    pub recursion_limit: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

////////////////////////////////////////////// Entry ///////////////////////////////////////////////

// One contiguous piece of a serialized message.
enum Entry<'a> {
    Field(&'a FieldDescriptor, &'a FieldValue),
    Item(ItemPacker<'a>),
    Unknown(FieldNumber, &'a UnknownField, bool),
}

// Sort key:  field number, then message-set type id, then known < extension < unknown.
type EntryKey = (u32, u32, u8);

const RANK_FIELD: u8 = 0;
const RANK_EXTENSION: u8 = 1;
const RANK_UNKNOWN: u8 = 2;

impl Packable for Entry<'_> {
    fn pack_sz(&self) -> usize {
        match self {
            Entry::Field(field, FieldValue::Single(value)) => {
                ValuePacker::new(field.number(), field.field_type(), value).pack_sz()
            }
            Entry::Field(field, FieldValue::Repeated(values)) if field.is_packed() => {
                PackedPacker::new(field.number(), field.field_type(), values).pack_sz()
            }
            Entry::Field(field, FieldValue::Repeated(values)) => values
                .iter()
                .map(|v| ValuePacker::new(field.number(), field.field_type(), v).pack_sz())
                .sum(),
            Entry::Item(item) => item.pack_sz(),
            Entry::Unknown(number, field, skip_length_delimited) => {
                unknown_packer(*number, field, *skip_length_delimited).pack_sz()
            }
        }
    }

    fn pack(&self, out: &mut [u8]) {
        match self {
            Entry::Field(field, FieldValue::Single(value)) => {
                ValuePacker::new(field.number(), field.field_type(), value).pack(out)
            }
            Entry::Field(field, FieldValue::Repeated(values)) if field.is_packed() => {
                PackedPacker::new(field.number(), field.field_type(), values).pack(out)
            }
            Entry::Field(field, FieldValue::Repeated(values)) => {
                let mut out = out;
                for value in values.iter() {
                    out = pack_helper(
                        ValuePacker::new(field.number(), field.field_type(), value),
                        out,
                    );
                }
            }
            Entry::Item(item) => item.pack(out),
            Entry::Unknown(number, field, skip_length_delimited) => {
                unknown_packer(*number, field, *skip_length_delimited).pack(out)
            }
        }
    }
}

fn unknown_packer(
    number: FieldNumber,
    field: &UnknownField,
    skip_length_delimited: bool,
) -> super::unknown::UnknownFieldPacker<'_> {
    let packer = field.packer(number);
    if skip_length_delimited {
        packer.without_length_delimited()
    } else {
        packer
    }
}

impl DynamicMessage {
    // Every piece of the message in the order it goes on the wire.
    fn entries(&self) -> Vec<Entry<'_>> {
        let message_set = self.descriptor.message_set_wire_format();
        let mut entries: Vec<(EntryKey, Entry<'_>)> = Vec::new();
        for (number, value) in self.fields.iter() {
            if let Some(field) = self.descriptor.field(*number) {
                entries.push(((*number, 0, RANK_FIELD), Entry::Field(field, value)));
            }
        }
        for (number, ext) in self.extensions.iter() {
            let field = ext.descriptor.field();
            match (&ext.value, message_set) {
                (FieldValue::Single(Value::Message(m)), true) => {
                    entries.push((
                        (ITEM_FIELD, *number, RANK_EXTENSION),
                        Entry::Item(ItemPacker::message(field.number(), m)),
                    ));
                }
                (value, _) => {
                    entries.push(((*number, 0, RANK_EXTENSION), Entry::Field(field, value)));
                }
            }
        }
        for (number, field) in self.unknown.iter() {
            let Ok(field_number) = FieldNumber::new(number) else {
                continue;
            };
            if message_set {
                for bytes in field.length_delimited() {
                    entries.push((
                        (ITEM_FIELD, number, RANK_UNKNOWN),
                        Entry::Item(ItemPacker::bytes(field_number, bytes)),
                    ));
                }
            }
            entries.push((
                (number, 0, RANK_UNKNOWN),
                Entry::Unknown(field_number, field, message_set),
            ));
        }
        // stable, so items sharing a key keep their encounter order
        entries.sort_by_key(|(key, _)| *key);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }
}

impl Packable for DynamicMessage {
    fn pack_sz(&self) -> usize {
        self.entries().iter().map(Packable::pack_sz).sum()
    }

    fn pack(&self, out: &mut [u8]) {
        let mut out = out;
        for entry in self.entries() {
            out = pack_helper(entry, out);
        }
    }
}

////////////////////////////////////////////// parsing /////////////////////////////////////////////

/// Parse all of `buf` into `msg`.
pub(crate) fn merge_from_slice(
    msg: &mut DynamicMessage,
    buf: &[u8],
    registry: &ExtensionRegistry,
    options: &ParseOptions,
) -> Result<(), Error> {
    let mut input = CodedInput::with_recursion_limit(buf, options.recursion_limit);
    merge_message(msg, &mut input, registry, None).map_err(Error::record)?;
    MESSAGES_PARSED.click();
    Ok(())
}

/// Read fields into `msg` until the input (or its current limit) runs out, or, when `group` is
/// set, until that group's end tag.
pub(crate) fn merge_message(
    msg: &mut DynamicMessage,
    input: &mut CodedInput<'_>,
    registry: &ExtensionRegistry,
    group: Option<FieldNumber>,
) -> Result<(), Error> {
    let descriptor = Arc::clone(&msg.descriptor);
    loop {
        let tag = match next_tag(input)? {
            Some(tag) => tag,
            None => {
                return match group {
                    Some(number) => Err(Error::MalformedGroup {
                        field_number: number.get(),
                        what: "input ended inside group",
                    }),
                    None => Ok(()),
                };
            }
        };
        if tag.wire_type == WireType::EndGroup {
            return match group {
                Some(number) if number == tag.field_number => Ok(()),
                Some(number) => Err(Error::MalformedGroup {
                    field_number: number.get(),
                    what: "group ended by a different field number",
                }),
                None => Err(Error::MalformedGroup {
                    field_number: tag.field_number.get(),
                    what: "end of group without a start",
                }),
            };
        }
        let number = tag.field_number.get();
        if descriptor.message_set_wire_format()
            && number == ITEM_FIELD
            && matches!(
                tag.wire_type,
                WireType::LengthDelimited | WireType::StartGroup
            )
        {
            message_set::merge_item(msg, tag, input, registry)?;
        } else if let Some(field) = descriptor.field(number) {
            let mut slot = msg.fields.remove(&number);
            merge_field(field, tag, input, registry, &mut slot)?;
            if let Some(value) = slot {
                msg.fields.insert(number, value);
            }
        } else if let Some(extension) = registry.lookup(descriptor.full_name(), number) {
            EXTENSIONS_RESOLVED.click();
            let mut slot = msg.extensions.remove(&number).map(|e| e.value);
            merge_field(extension.field(), tag, input, registry, &mut slot)?;
            if let Some(value) = slot {
                msg.extensions.insert(
                    number,
                    ExtensionField {
                        descriptor: Arc::clone(extension),
                        value,
                    },
                );
            }
        } else {
            UNKNOWN_FIELDS.click();
            msg.unknown.read_field(tag, input)?;
        }
    }
}

// Read the value following `tag` as `field` and merge it into `slot`.
fn merge_field(
    field: &FieldDescriptor,
    tag: Tag,
    input: &mut CodedInput<'_>,
    registry: &ExtensionRegistry,
    slot: &mut Option<FieldValue>,
) -> Result<(), Error> {
    let number = field.number();
    if tag.wire_type != field.wire_type() {
        // repeated scalars are accepted packed or not, whatever the schema writes
        if tag.wire_type == WireType::LengthDelimited
            && field.is_repeated()
            && field.field_type().is_packable()
        {
            let len = input.read_length()?;
            let limit = input.push_limit(len)?;
            let mut values = Vec::new();
            while !input.is_at_end() {
                values.push(Scalar::read(field.field_type(), number, input)?);
            }
            input.pop_limit(limit);
            for value in values {
                store(field, slot, value);
            }
            return Ok(());
        }
        return Err(Error::WireTypeMismatch {
            field_number: number.get(),
            expected: field.wire_type(),
            got: tag.wire_type,
        });
    }
    let value = match field.field_type() {
        FieldType::String => {
            let bytes = input.read_length_delimited()?;
            let s = std::str::from_utf8(bytes).map_err(|_| Error::StringEncoding {
                field_number: number.get(),
            })?;
            Value::String(s.to_string())
        }
        FieldType::Bytes => Value::Bytes(input.read_length_delimited()?.to_vec()),
        FieldType::Message | FieldType::Group => {
            let message_type = field
                .message_type()
                .ok_or_else(|| Error::InvalidDescriptor {
                    name: field.name().to_string(),
                    what: "message and group fields need a message type",
                })?;
            // a singular message seen twice merges with the first
            let existing = match (field.is_repeated(), slot.take()) {
                (false, Some(FieldValue::Single(Value::Message(m)))) => Some(m),
                (_, taken) => {
                    *slot = taken;
                    None
                }
            };
            let mut nested =
                existing.unwrap_or_else(|| DynamicMessage::new(Arc::clone(message_type)));
            if field.field_type() == FieldType::Group {
                merge_group(&mut nested, number, input, registry)?;
            } else {
                merge_length_delimited(&mut nested, input, registry)?;
            }
            Value::Message(nested)
        }
        field_type => Scalar::read(field_type, number, input)?,
    };
    store(field, slot, value);
    Ok(())
}

fn store(field: &FieldDescriptor, slot: &mut Option<FieldValue>, value: Value) {
    if field.is_repeated() {
        match slot {
            Some(FieldValue::Repeated(values)) => values.push(value),
            _ => *slot = Some(FieldValue::Repeated(vec![value])),
        }
    } else {
        *slot = Some(FieldValue::Single(value));
    }
}

/// Read a length-prefixed embedded message into `msg`.
pub(crate) fn merge_length_delimited(
    msg: &mut DynamicMessage,
    input: &mut CodedInput<'_>,
    registry: &ExtensionRegistry,
) -> Result<(), Error> {
    let len = input.read_length()?;
    let limit = input.push_limit(len)?;
    input.enter_recursion()?;
    let result = merge_message(msg, input, registry, None);
    input.leave_recursion();
    result?;
    // a zero tag ends the message early; the rest of its bytes are skipped
    input.skip_to_limit();
    input.pop_limit(limit);
    Ok(())
}

fn merge_group(
    msg: &mut DynamicMessage,
    number: FieldNumber,
    input: &mut CodedInput<'_>,
    registry: &ExtensionRegistry,
) -> Result<(), Error> {
    input.enter_recursion()?;
    let result = merge_message(msg, input, registry, Some(number));
    input.leave_recursion();
    result
}

/// Parse a payload that was captured as bytes, one level below `parent`.
pub(crate) fn merge_payload(
    msg: &mut DynamicMessage,
    payload: &[u8],
    parent: &CodedInput<'_>,
    registry: &ExtensionRegistry,
) -> Result<(), Error> {
    let mut input = parent.fork(payload);
    input.enter_recursion()?;
    merge_message(msg, &mut input, registry, None)
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use wirebuf::stack_pack;

    use super::*;
    use crate::{Cardinality, MessageBuilder, MessageDescriptor};

    fn simple() -> Arc<crate::MessageDescriptor> {
        MessageDescriptor::builder("test.Simple")
            .field(FieldDescriptor::new(1, "a", FieldType::Int32, Cardinality::Optional).unwrap())
            .field(FieldDescriptor::new(2, "s", FieldType::String, Cardinality::Optional).unwrap())
            .field(
                FieldDescriptor::new(3, "r", FieldType::SInt32, Cardinality::Repeated).unwrap(),
            )
            .field(
                FieldDescriptor::new(4, "p", FieldType::Int32, Cardinality::Repeated)
                    .unwrap()
                    .packed()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn parse(buf: &[u8]) -> Result<DynamicMessage, Error> {
        crate::deserialize(&simple(), buf, ExtensionRegistry::empty())
    }

    #[test]
    fn known_vector() {
        let mut b = MessageBuilder::new(simple());
        b.set_field(1, Value::I32(150))
            .unwrap()
            .set_field(2, Value::String("hi".into()))
            .unwrap()
            .add_repeated(3, Value::I32(-1))
            .unwrap()
            .add_repeated(3, Value::I32(1))
            .unwrap()
            .add_repeated(4, Value::I32(5))
            .unwrap()
            .add_repeated(4, Value::I32(6))
            .unwrap();
        let m = b.build();
        let buf = stack_pack(&m).to_vec();
        assert_eq!(
            vec![
                0x08, 0x96, 0x01, // a
                0x12, 0x02, b'h', b'i', // s
                0x18, 0x01, 0x18, 0x02, // r, unpacked
                0x22, 0x02, 0x05, 0x06, // p, packed
            ],
            buf
        );
        assert_eq!(buf.len(), m.pack_sz());
        assert_eq!(Ok(m), parse(&buf));
    }

    #[test]
    fn packed_and_unpacked_both_parse() {
        let unpacked = parse(&[0x20, 0x05, 0x20, 0x06]).unwrap();
        let packed = parse(&[0x22, 0x02, 0x05, 0x06]).unwrap();
        assert_eq!(unpacked, packed);
        let sint_packed = parse(&[0x1a, 0x02, 0x01, 0x02]).unwrap();
        assert_eq!(
            Some(&FieldValue::Repeated(vec![Value::I32(-1), Value::I32(1)])),
            sint_packed.get_field(3)
        );
    }

    #[test]
    fn empty_packed_run_leaves_field_unset() {
        let m = parse(&[0x22, 0x00]).unwrap();
        assert!(!m.has_field(4));
    }

    #[test]
    fn last_one_wins() {
        let m = parse(&[0x08, 0x01, 0x08, 0x02]).unwrap();
        assert_eq!(Some(&FieldValue::Single(Value::I32(2))), m.get_field(1));
    }

    #[test]
    fn wire_type_mismatch() {
        assert_eq!(
            Err(Error::WireTypeMismatch {
                field_number: 1,
                expected: WireType::Varint,
                got: WireType::ThirtyTwo,
            }),
            parse(&[0x0d, 0, 0, 0, 0])
        );
        // strings cannot be written as varints
        assert!(matches!(
            parse(&[0x10, 0x01]),
            Err(Error::WireTypeMismatch { field_number: 2, .. })
        ));
    }

    #[test]
    fn unknown_fields_survive() {
        let buf: &[u8] = &[0x08, 0x01, 0x28, 0x07, 0x35, 1, 2, 3, 4];
        let m = parse(buf).unwrap();
        assert_eq!(&[7], m.unknown.get(5).unwrap().varint());
        assert_eq!(&[0x04030201], m.unknown.get(6).unwrap().fixed32());
        assert_eq!(buf, stack_pack(&m).to_vec().as_slice());
    }

    #[test]
    fn unknown_interleaves_by_number() {
        let mut b = MessageBuilder::new(simple());
        let mut unknown = crate::UnknownFieldSet::new();
        unknown.merge_varint(FieldNumber::new(100).unwrap(), 1);
        unknown.merge_varint(FieldNumber::new(3).unwrap(), 9);
        b.set_field(1, Value::I32(1))
            .unwrap()
            .add_repeated(4, Value::I32(1))
            .unwrap()
            .set_unknown_fields(unknown);
        let buf = stack_pack(&b.build()).to_vec();
        // 1, unknown 3, packed 4, unknown 100
        assert_eq!(
            vec![0x08, 0x01, 0x18, 0x09, 0x22, 0x01, 0x01, 0xa0, 0x06, 0x01],
            buf
        );
    }

    #[test]
    fn invalid_utf8() {
        assert_eq!(
            Err(Error::StringEncoding { field_number: 2 }),
            parse(&[0x12, 0x01, 0xff])
        );
    }

    #[test]
    fn truncated_length_delimited() {
        assert_eq!(
            Err(Error::TruncatedMessage {
                required: 5,
                had: 2
            }),
            parse(&[0x12, 0x05, b'h', b'i'])
        );
    }

    #[test]
    fn truncated_varint_value() {
        assert!(matches!(
            parse(&[0x08, 0xff, 0xff]),
            Err(Error::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn overlong_varint() {
        let mut buf = vec![0x08];
        buf.extend_from_slice(&[0xff; 10]);
        buf.push(0x01);
        assert_eq!(Err(Error::MalformedVarint { bytes: 10 }), parse(&buf));
    }

    #[test]
    fn stray_end_group() {
        assert_eq!(
            Err(Error::MalformedGroup {
                field_number: 7,
                what: "end of group without a start",
            }),
            parse(&[0x3c])
        );
    }

    #[test]
    fn zero_tag_stops() {
        let m = parse(&[0x08, 0x01, 0x00, 0x08, 0x02]).unwrap();
        assert_eq!(Some(&FieldValue::Single(Value::I32(1))), m.get_field(1));
    }

    #[test]
    fn bad_wire_type() {
        assert_eq!(
            Err(Error::UnhandledWireType { wire_type: 6 }),
            parse(&[0x0e])
        );
    }
}
