//! The message-set wire format.
//!
//! A message set carries its extensions as a repeated field 1 of items, where each item holds the
//! extension's number as `type_id` (field 2) and its serialized payload as `message` (field 3):
//!
//! ```text
//! message RawMessageSet {
//!   repeated Item item = 1;
//!   message Item {
//!     required int32 type_id = 2;
//!     required bytes message = 3;
//!   }
//! }
//! ```
//!
//! Items are written length-delimited.  Items are read either length-delimited or as groups.
//! Items whose type id the registry cannot resolve are kept as length-delimited unknown fields
//! under the type id, and are written back out as items.

use std::sync::Arc;

use indicio::{clue, ERROR};
use wirebuf::{length_prefixed, pack_helper, v64, CodedInput, Packable};

use super::codec::merge_payload;
use super::message::{ExtensionField, FieldValue};
use super::{
    next_tag, Cardinality, DynamicMessage, Error, ExtensionRegistry, FieldDescriptor, FieldNumber,
    FieldType, MessageDescriptor, Tag, UnknownFieldSet, Value, WireType, COLLECTOR,
    EXTENSIONS_RESOLVED, MESSAGE_SET_ITEMS, UNKNOWN_FIELDS,
};

/// Field number of the repeated item field.
pub const ITEM_FIELD: u32 = 1;
/// Field number of `type_id` within an item.
pub const TYPE_ID_FIELD: u32 = 2;
/// Field number of `message` within an item.
pub const MESSAGE_FIELD: u32 = 3;

const ITEM: FieldNumber = FieldNumber {
    field_number: ITEM_FIELD,
};
const TYPE_ID: FieldNumber = FieldNumber {
    field_number: TYPE_ID_FIELD,
};
const MESSAGE: FieldNumber = FieldNumber {
    field_number: MESSAGE_FIELD,
};

////////////////////////////////////////// MessageSetItem //////////////////////////////////////////

/// One item as it appears on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageSetItem {
    pub type_id: u32,
    pub message: Vec<u8>,
}

/// The items `msg` will serialize as, in wire order:  set extensions and preserved unknown items,
/// ascending by type id.
pub fn items(msg: &DynamicMessage) -> Vec<MessageSetItem> {
    let mut items: Vec<MessageSetItem> = Vec::new();
    for ext in msg.extensions() {
        if let FieldValue::Single(Value::Message(m)) = ext.value() {
            items.push(MessageSetItem {
                type_id: ext.descriptor().number(),
                message: wirebuf::stack_pack(m).to_vec(),
            });
        }
    }
    for (number, field) in msg.unknown.iter() {
        for bytes in field.length_delimited() {
            items.push(MessageSetItem {
                type_id: number,
                message: bytes.clone(),
            });
        }
    }
    items.sort_by_key(|item| item.type_id);
    items
}

//////////////////////////////////////////// ItemPacker ////////////////////////////////////////////

enum Payload<'a> {
    Message(&'a DynamicMessage),
    Bytes(&'a [u8]),
}

/// Writes one length-delimited item.
pub(crate) struct ItemPacker<'a> {
    type_id: FieldNumber,
    payload: Payload<'a>,
}

impl<'a> ItemPacker<'a> {
    pub(crate) fn message(type_id: FieldNumber, msg: &'a DynamicMessage) -> Self {
        Self {
            type_id,
            payload: Payload::Message(msg),
        }
    }

    pub(crate) fn bytes(type_id: FieldNumber, bytes: &'a [u8]) -> Self {
        Self {
            type_id,
            payload: Payload::Bytes(bytes),
        }
    }

    fn body_sz(&self) -> usize {
        let type_id = Tag {
            field_number: TYPE_ID,
            wire_type: WireType::Varint,
        };
        let message = Tag {
            field_number: MESSAGE,
            wire_type: WireType::LengthDelimited,
        };
        let payload = match &self.payload {
            Payload::Message(m) => {
                let sz = m.pack_sz();
                v64::from(sz).pack_sz() + sz
            }
            Payload::Bytes(b) => b.pack_sz(),
        };
        type_id.pack_sz() + v64::from(self.type_id.get()).pack_sz() + message.pack_sz() + payload
    }
}

impl Packable for ItemPacker<'_> {
    fn pack_sz(&self) -> usize {
        let item = Tag {
            field_number: ITEM,
            wire_type: WireType::LengthDelimited,
        };
        let body = self.body_sz();
        item.pack_sz() + v64::from(body).pack_sz() + body
    }

    fn pack(&self, out: &mut [u8]) {
        let item = Tag {
            field_number: ITEM,
            wire_type: WireType::LengthDelimited,
        };
        let type_id = Tag {
            field_number: TYPE_ID,
            wire_type: WireType::Varint,
        };
        let message = Tag {
            field_number: MESSAGE,
            wire_type: WireType::LengthDelimited,
        };
        let out = pack_helper(item, out);
        let out = pack_helper(v64::from(self.body_sz()), out);
        let out = pack_helper(type_id, out);
        let out = pack_helper(v64::from(self.type_id.get()), out);
        let out = pack_helper(message, out);
        match &self.payload {
            Payload::Message(m) => {
                pack_helper(length_prefixed(*m), out);
            }
            Payload::Bytes(b) => {
                pack_helper(*b, out);
            }
        }
    }
}

////////////////////////////////////////////// parsing /////////////////////////////////////////////

/// Read the item that follows `tag` and merge it into `msg`.
pub(crate) fn merge_item(
    msg: &mut DynamicMessage,
    tag: Tag,
    input: &mut CodedInput<'_>,
    registry: &ExtensionRegistry,
) -> Result<(), Error> {
    MESSAGE_SET_ITEMS.click();
    let (type_id, payload) = match tag.wire_type {
        WireType::LengthDelimited => {
            let len = input.read_length()?;
            let limit = input.push_limit(len)?;
            let item = read_item(input, None)?;
            input.skip_to_limit();
            input.pop_limit(limit);
            item
        }
        WireType::StartGroup => {
            input.enter_recursion()?;
            let item = read_item(input, Some(tag.field_number));
            input.leave_recursion();
            item?
        }
        got => {
            return Err(Error::WireTypeMismatch {
                field_number: ITEM_FIELD,
                expected: WireType::LengthDelimited,
                got,
            });
        }
    };
    let number = type_id.get();
    let descriptor = Arc::clone(&msg.descriptor);
    if let Some(field) = descriptor.field(number) {
        let message_set = descriptor.full_name();
        clue!(COLLECTOR, ERROR, {
            message_set_type_id_collision: message_set,
            type_id: number as u64,
        });
        return Err(Error::WireTypeMismatch {
            field_number: number,
            expected: field.wire_type(),
            got: tag.wire_type,
        });
    }
    match registry.lookup(descriptor.full_name(), number) {
        Some(extension) => {
            let message_type = match extension.field().message_type() {
                Some(message_type) if extension.field().field_type() == FieldType::Message => {
                    message_type
                }
                _ => {
                    return Err(Error::WireTypeMismatch {
                        field_number: number,
                        expected: extension.field().wire_type(),
                        got: WireType::LengthDelimited,
                    });
                }
            };
            EXTENSIONS_RESOLVED.click();
            // an item repeated for the same type id merges into the first
            let mut nested = match msg.extensions.remove(&number) {
                Some(ExtensionField {
                    value: FieldValue::Single(Value::Message(m)),
                    ..
                }) => m,
                _ => DynamicMessage::new(Arc::clone(message_type)),
            };
            merge_payload(&mut nested, payload, input, registry)?;
            msg.extensions.insert(
                number,
                ExtensionField {
                    descriptor: Arc::clone(extension),
                    value: FieldValue::Single(Value::Message(nested)),
                },
            );
        }
        None => {
            UNKNOWN_FIELDS.click();
            msg.unknown.merge_length_delimited(type_id, payload.to_vec());
        }
    }
    Ok(())
}

// Read an item's fields.  The last type_id and the last message win; anything else is skipped.
fn read_item<'a>(
    input: &mut CodedInput<'a>,
    group: Option<FieldNumber>,
) -> Result<(FieldNumber, &'a [u8]), Error> {
    let mut type_id: Option<u64> = None;
    let mut payload: &'a [u8] = &[];
    loop {
        let tag = match next_tag(input)? {
            Some(tag) => tag,
            None if group.is_some() => {
                return Err(Error::MalformedGroup {
                    field_number: ITEM_FIELD,
                    what: "input ended inside message set item",
                });
            }
            None => break,
        };
        match (tag.field_number.get(), tag.wire_type) {
            (_, WireType::EndGroup) => {
                if Some(tag.field_number) == group {
                    break;
                }
                return Err(Error::MalformedGroup {
                    field_number: tag.field_number.get(),
                    what: "message set item ended by the wrong tag",
                });
            }
            (TYPE_ID_FIELD, WireType::Varint) => {
                type_id = Some(input.read_varint()?);
            }
            (MESSAGE_FIELD, WireType::LengthDelimited) => {
                payload = input.read_length_delimited()?;
            }
            (TYPE_ID_FIELD, got) => {
                return Err(Error::WireTypeMismatch {
                    field_number: TYPE_ID_FIELD,
                    expected: WireType::Varint,
                    got,
                });
            }
            (MESSAGE_FIELD, got) => {
                return Err(Error::WireTypeMismatch {
                    field_number: MESSAGE_FIELD,
                    expected: WireType::LengthDelimited,
                    got,
                });
            }
            _ => {
                UnknownFieldSet::new().read_field(tag, input)?;
            }
        }
    }
    let type_id = type_id.ok_or(Error::MalformedMessageSetItem {
        what: "item without a type_id",
    })?;
    let field_number = u32::try_from(type_id)
        .ok()
        .and_then(|t| FieldNumber::new(t).ok())
        .ok_or(Error::InvalidFieldNumber {
            field_number: type_id,
            what: "message set type_id out of range",
        })?;
    Ok((field_number, payload))
}

////////////////////////////////////////// RawMessageSet ///////////////////////////////////////////

/// A schema that reads any message set as plain items, without consulting a registry.
pub fn raw_message_set_descriptor() -> Result<Arc<MessageDescriptor>, Error> {
    let item = MessageDescriptor::builder("protobuf_unittest.RawMessageSet.Item")
        .field(FieldDescriptor::new(
            TYPE_ID_FIELD,
            "type_id",
            FieldType::Int32,
            Cardinality::Required,
        )?)
        .field(FieldDescriptor::new(
            MESSAGE_FIELD,
            "message",
            FieldType::Bytes,
            Cardinality::Required,
        )?)
        .build()?;
    MessageDescriptor::builder("protobuf_unittest.RawMessageSet")
        .field(FieldDescriptor::new_message(
            ITEM_FIELD,
            "item",
            Cardinality::Repeated,
            &item,
        )?)
        .build()
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////
