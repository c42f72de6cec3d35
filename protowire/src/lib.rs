//! protowire is a schema-driven codec for the protocol buffers wire format.
//!
//! Messages are described at runtime by [MessageDescriptor]s and carried by [DynamicMessage]s.
//! Serialization emits fields in ascending field-number order, interleaving known fields, set
//! extensions, and preserved unknown fields.  Parsing routes every field number the schema does
//! not know either to an extension registered in an [ExtensionRegistry] or, failing that, to the
//! message's [UnknownFieldSet] so that it survives a round trip untouched.  Message types flagged
//! with the message-set wire format carry their extensions as `{type_id, message}` items instead.
//!
//! The byte-level layer (varints, zig-zag, bounded input) lives in the `wirebuf` crate.

use std::sync::Arc;

use indicio::{clue, ERROR};
use wirebuf::{stack_pack, v64, CodedInput, Packable, Unpackable, Unpacker};

mod codec;
pub mod descriptor;
pub mod extension;
pub mod field_types;
pub mod message;
pub mod message_set;
pub mod unittest;
pub mod unknown;
pub mod value;

pub use codec::ParseOptions;
pub use descriptor::{FieldDescriptor, MessageDescriptor, MessageDescriptorBuilder};
pub use extension::{ExtensionDescriptor, ExtensionRegistry};
pub use field_types::{Cardinality, FieldType};
pub use message::{Builder, DynamicMessage, ExtensionField, FieldValue, Message, MessageBuilder};
pub use unknown::{UnknownField, UnknownFieldSet};
pub use value::Value;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static MESSAGES_PARSED: biometrics::Counter = biometrics::Counter::new("protowire.messages_parsed");
static MESSAGES_SERIALIZED: biometrics::Counter =
    biometrics::Counter::new("protowire.messages_serialized");
static UNKNOWN_FIELDS: biometrics::Counter = biometrics::Counter::new("protowire.unknown_fields");
static EXTENSIONS_RESOLVED: biometrics::Counter =
    biometrics::Counter::new("protowire.extensions_resolved");
static MESSAGE_SET_ITEMS: biometrics::Counter =
    biometrics::Counter::new("protowire.message_set_items");

static MALFORMED_VARINT: biometrics::Counter =
    biometrics::Counter::new("protowire.error.malformed_varint");
static TRUNCATED_MESSAGE: biometrics::Counter =
    biometrics::Counter::new("protowire.error.truncated_message");
static WIRE_TYPE_MISMATCH: biometrics::Counter =
    biometrics::Counter::new("protowire.error.wire_type_mismatch");
static MALFORMED_GROUP: biometrics::Counter =
    biometrics::Counter::new("protowire.error.malformed_group");
static RECURSION_LIMIT_EXCEEDED: biometrics::Counter =
    biometrics::Counter::new("protowire.error.recursion_limit_exceeded");
static INVALID_FIELD_NUMBER: biometrics::Counter =
    biometrics::Counter::new("protowire.error.invalid_field_number");
static DUPLICATE_EXTENSION: biometrics::Counter =
    biometrics::Counter::new("protowire.error.duplicate_extension");
static REGISTRY_FROZEN: biometrics::Counter =
    biometrics::Counter::new("protowire.error.registry_frozen");
static OTHER_ERROR: biometrics::Counter = biometrics::Counter::new("protowire.error.other");

/// Register this crate's counters, and wirebuf's, with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    wirebuf::register_biometrics(collector);
    collector.register_counter(&MESSAGES_PARSED);
    collector.register_counter(&MESSAGES_SERIALIZED);
    collector.register_counter(&UNKNOWN_FIELDS);
    collector.register_counter(&EXTENSIONS_RESOLVED);
    collector.register_counter(&MESSAGE_SET_ITEMS);
    collector.register_counter(&MALFORMED_VARINT);
    collector.register_counter(&TRUNCATED_MESSAGE);
    collector.register_counter(&WIRE_TYPE_MISMATCH);
    collector.register_counter(&MALFORMED_GROUP);
    collector.register_counter(&RECURSION_LIMIT_EXCEEDED);
    collector.register_counter(&INVALID_FIELD_NUMBER);
    collector.register_counter(&DUPLICATE_EXTENSION);
    collector.register_counter(&REGISTRY_FROZEN);
    collector.register_counter(&OTHER_ERROR);
}

////////////////////////////////////////////// indicio /////////////////////////////////////////////

/// The collector for protowire's structured log records.
pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Error captures the possible error conditions for encoding, decoding, and describing messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// MalformedVarint indicates a varint that did not terminate within ten bytes.
    MalformedVarint { bytes: usize },
    /// TruncatedMessage indicates a read past the end of the input or the enclosing
    /// length-delimited range.
    TruncatedMessage { required: usize, had: usize },
    /// WireTypeMismatch indicates that a tag's wire type disagrees with the schema.
    WireTypeMismatch {
        field_number: u32,
        expected: WireType,
        got: WireType,
    },
    /// MalformedGroup indicates a group that was never closed or was closed by the wrong number.
    MalformedGroup {
        field_number: u32,
        what: &'static str,
    },
    /// RecursionLimitExceeded indicates nesting deeper than the parse options permit.
    RecursionLimitExceeded { limit: usize },
    /// InvalidFieldNumber indicates that the field is not a user-assignable field.
    InvalidFieldNumber {
        field_number: u64,
        what: &'static str,
    },
    /// DuplicateExtension indicates a second, different extension at an already-registered
    /// number.
    DuplicateExtension { extendee: String, field_number: u32 },
    /// RegistryFrozen indicates an attempt to register with a read-only registry.
    RegistryFrozen { extendee: String, field_number: u32 },
    /// UnhandledWireType indicates a tag with wire type 6 or 7.
    UnhandledWireType { wire_type: u32 },
    /// TagTooLarge indicates the tag would overflow a 32-bit number.
    TagTooLarge { tag: u64 },
    /// UnsignedOverflow indicates that a value will not fit its intended (unsigned) target.
    UnsignedOverflow { value: u64 },
    /// StringEncoding indicates that a string field's bytes are not UTF-8.
    StringEncoding { field_number: u32 },
    /// InvalidDescriptor indicates a schema that cannot be encoded.
    InvalidDescriptor { name: String, what: &'static str },
    /// NoSuchField indicates that a message type does not declare the field.
    NoSuchField { message: String, field_number: u32 },
    /// ValueTypeMismatch indicates a value whose variant cannot carry the field's type.
    ValueTypeMismatch {
        field_number: u32,
        expected: FieldType,
    },
    /// CardinalityMismatch indicates a singular operation on a repeated field or vice versa.
    CardinalityMismatch {
        field_number: u32,
        what: &'static str,
    },
    /// MessageTypeMismatch indicates a message of one type where another type was expected.
    MessageTypeMismatch { expected: String, got: String },
    /// MalformedMessageSetItem indicates a message-set item that cannot be interpreted.
    MalformedMessageSetItem { what: &'static str },
}

impl Error {
    // Count (and for the worst, log) an error as it leaves the crate.
    fn record(self) -> Self {
        match &self {
            Error::MalformedVarint { .. } => MALFORMED_VARINT.click(),
            Error::TruncatedMessage { .. } => TRUNCATED_MESSAGE.click(),
            Error::WireTypeMismatch { .. } => WIRE_TYPE_MISMATCH.click(),
            Error::MalformedGroup { .. } => MALFORMED_GROUP.click(),
            Error::RecursionLimitExceeded { limit } => {
                RECURSION_LIMIT_EXCEEDED.click();
                let limit = *limit as u64;
                clue!(COLLECTOR, ERROR, {
                    recursion_limit_exceeded: limit,
                });
            }
            Error::InvalidFieldNumber { .. } => INVALID_FIELD_NUMBER.click(),
            Error::DuplicateExtension { .. } => DUPLICATE_EXTENSION.click(),
            Error::RegistryFrozen { .. } => REGISTRY_FROZEN.click(),
            _ => OTHER_ERROR.click(),
        }
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedVarint { bytes } => {
                write!(f, "malformed varint: no terminating byte within {} bytes", bytes)
            }
            Error::TruncatedMessage { required, had } => {
                write!(f, "truncated message: expected {} bytes, had {}", required, had)
            }
            Error::WireTypeMismatch {
                field_number,
                expected,
                got,
            } => write!(
                f,
                "field_number={} expects wire type {:?}, got {:?}",
                field_number, expected, got
            ),
            Error::MalformedGroup { field_number, what } => {
                write!(f, "malformed group field_number={}: {}", field_number, what)
            }
            Error::RecursionLimitExceeded { limit } => {
                write!(f, "message nesting exceeds recursion limit={}", limit)
            }
            Error::InvalidFieldNumber { field_number, what } => {
                write!(f, "invalid field_number={}: {}", field_number, what)
            }
            Error::DuplicateExtension {
                extendee,
                field_number,
            } => write!(
                f,
                "{} already has a different extension at field_number={}",
                extendee, field_number
            ),
            Error::RegistryFrozen {
                extendee,
                field_number,
            } => write!(
                f,
                "registry is read-only; cannot add {} field_number={}",
                extendee, field_number
            ),
            Error::UnhandledWireType { wire_type } => write!(
                f,
                "wire_type={} not handled by this implementation",
                wire_type
            ),
            Error::TagTooLarge { tag } => write!(f, "tag={} overflows 32-bits", tag),
            Error::UnsignedOverflow { value } => {
                write!(f, "unsigned integer cannot hold value={}", value)
            }
            Error::StringEncoding { field_number } => {
                write!(f, "field_number={} must be encoded in UTF-8", field_number)
            }
            Error::InvalidDescriptor { name, what } => {
                write!(f, "invalid descriptor {}: {}", name, what)
            }
            Error::NoSuchField {
                message,
                field_number,
            } => write!(f, "{} has no field_number={}", message, field_number),
            Error::ValueTypeMismatch {
                field_number,
                expected,
            } => write!(
                f,
                "field_number={} cannot hold this value; expected {:?}",
                field_number, expected
            ),
            Error::CardinalityMismatch { field_number, what } => {
                write!(f, "field_number={}: {}", field_number, what)
            }
            Error::MessageTypeMismatch { expected, got } => {
                write!(f, "expected message type {}, got {}", expected, got)
            }
            Error::MalformedMessageSetItem { what } => {
                write!(f, "malformed message set item: {}", what)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<wirebuf::Error> for Error {
    fn from(x: wirebuf::Error) -> Self {
        match x {
            wirebuf::Error::BufferTooShort { required, had } => {
                Error::TruncatedMessage { required, had }
            }
            wirebuf::Error::VarintOverflow { bytes } => Error::MalformedVarint { bytes },
            wirebuf::Error::UnsignedOverflow { value } => Error::UnsignedOverflow { value },
            wirebuf::Error::RecursionLimitExceeded { limit } => {
                Error::RecursionLimitExceeded { limit }
            }
        }
    }
}

///////////////////////////////////////////// WireType /////////////////////////////////////////////

/// The six encodings a value can take on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WireType {
    /// Varint is wire type 0.  The payload is a single v64.
    Varint,
    /// SixtyFour is wire type 1.  The payload is a little-endian u64.
    SixtyFour,
    /// LengthDelimited is wire type 2.  The payload is a v64 length followed by that many bytes.
    LengthDelimited,
    /// StartGroup is wire type 3.  Fields follow until the matching EndGroup.
    StartGroup,
    /// EndGroup is wire type 4.  It carries no payload.
    EndGroup,
    /// ThirtyTwo is wire type 5.  The payload is a little-endian u32.
    ThirtyTwo,
}

impl WireType {
    /// Every wire type, in tag-bit order.
    pub const ALL: [WireType; 6] = [
        WireType::Varint,
        WireType::SixtyFour,
        WireType::LengthDelimited,
        WireType::StartGroup,
        WireType::EndGroup,
        WireType::ThirtyTwo,
    ];

    /// Interpret the low three bits of a tag.
    pub fn new(tag_bits: u32) -> Result<WireType, Error> {
        match tag_bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::SixtyFour),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::ThirtyTwo),
            _ => Err(Error::UnhandledWireType {
                wire_type: tag_bits,
            }),
        }
    }

    /// `tag_bits` returns the WireType's contribution to the tag, suitable for bit-wise or'ing with
    /// the FieldNumber.
    pub fn tag_bits(&self) -> u32 {
        match self {
            WireType::Varint => 0,
            WireType::SixtyFour => 1,
            WireType::LengthDelimited => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::ThirtyTwo => 5,
        }
    }
}

//////////////////////////////////////////// FieldNumber ///////////////////////////////////////////

pub const FIRST_FIELD_NUMBER: u32 = 1;
pub const LAST_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Numbers a schema may not declare.  They are still legal on the wire.
pub const FIRST_RESERVED_FIELD_NUMBER: u32 = 19000;
pub const LAST_RESERVED_FIELD_NUMBER: u32 = 19999;

/// A field number known to be in `FIRST_FIELD_NUMBER..=LAST_FIELD_NUMBER`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FieldNumber {
    field_number: u32,
}

impl FieldNumber {
    pub fn new(field_number: u32) -> Result<FieldNumber, Error> {
        if field_number < FIRST_FIELD_NUMBER {
            return Err(Error::InvalidFieldNumber {
                field_number: field_number as u64,
                what: "field number must be positive integer",
            });
        }
        if field_number > LAST_FIELD_NUMBER {
            return Err(Error::InvalidFieldNumber {
                field_number: field_number as u64,
                what: "field number too large",
            });
        }
        Ok(FieldNumber { field_number })
    }

    pub fn get(self) -> u32 {
        self.field_number
    }

    /// True for the numbers reserved to the implementation.
    pub fn is_reserved(self) -> bool {
        (FIRST_RESERVED_FIELD_NUMBER..=LAST_RESERVED_FIELD_NUMBER).contains(&self.field_number)
    }
}

impl From<FieldNumber> for u32 {
    fn from(f: FieldNumber) -> u32 {
        f.field_number
    }
}

impl std::cmp::PartialEq<u32> for FieldNumber {
    fn eq(&self, other: &u32) -> bool {
        self.field_number == *other
    }
}

impl std::fmt::Display for FieldNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.field_number)
    }
}

//////////////////////////////////////////////// Tag ///////////////////////////////////////////////

/// The (field number, wire type) pair that prefixes every field on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tag {
    pub field_number: FieldNumber,
    pub wire_type: WireType,
}

impl Tag {
    /// Create a tag, validating the field number.
    pub fn new(field_number: u32, wire_type: WireType) -> Result<Tag, Error> {
        Ok(Tag {
            field_number: FieldNumber::new(field_number)?,
            wire_type,
        })
    }

    /// The integer the tag is encoded as:  `(field_number << 3) | wire_type`.
    pub fn encode(&self) -> u32 {
        (self.field_number.get() << 3) | self.wire_type.tag_bits()
    }

    /// Interpret the integer a tag is encoded as.  Zero is the end-of-stream sentinel and decodes
    /// to `None`.
    pub fn decode(tag: u64) -> Result<Option<Tag>, Error> {
        if tag == 0 {
            return Ok(None);
        }
        if tag > u32::MAX as u64 {
            return Err(Error::TagTooLarge { tag });
        }
        let tag = tag as u32;
        let field_number = FieldNumber::new(tag >> 3)?;
        let wire_type = WireType::new(tag & 7)?;
        Ok(Some(Tag {
            field_number,
            wire_type,
        }))
    }

    fn v64(&self) -> v64 {
        self.encode().into()
    }
}

impl Packable for Tag {
    fn pack_sz(&self) -> usize {
        self.v64().pack_sz()
    }

    fn pack(&self, buf: &mut [u8]) {
        self.v64().pack(buf)
    }
}

impl<'a> Unpackable<'a> for Tag {
    type Error = Error;

    fn unpack<'b: 'a>(buf: &'b [u8]) -> Result<(Self, &'b [u8]), Error> {
        let mut up = Unpacker::new(buf);
        let tag: v64 = up.unpack().map_err(|err: wirebuf::Error| Error::from(err).record())?;
        match Tag::decode(tag.into()).map_err(Error::record)? {
            Some(tag) => Ok((tag, up.remain())),
            None => Err(Error::InvalidFieldNumber {
                field_number: 0,
                what: "tag zero marks the end of input",
            }
            .record()),
        }
    }
}

/// Read the next tag, returning `None` at the end of the current limit or on a zero tag.
pub fn read_tag(input: &mut CodedInput<'_>) -> Result<Option<Tag>, Error> {
    next_tag(input).map_err(Error::record)
}

// read_tag without recording; errors are recorded once, where they leave the crate.
pub(crate) fn next_tag(input: &mut CodedInput<'_>) -> Result<Option<Tag>, Error> {
    if input.is_at_end() {
        return Ok(None);
    }
    Tag::decode(input.read_varint()?)
}

////////////////////////////////////////// entry points ////////////////////////////////////////////

/// Serialize `msg` to a newly allocated vector.
pub fn serialize<M: Message>(msg: &M) -> Vec<u8> {
    MESSAGES_SERIALIZED.click();
    stack_pack(msg).to_vec()
}

/// The number of bytes [serialize] will produce for `msg`.
pub fn serialized_size<M: Message>(msg: &M) -> usize {
    msg.pack_sz()
}

/// Parse `buf` as a message of type `descriptor`, resolving extensions through `registry`.
pub fn deserialize(
    descriptor: &Arc<MessageDescriptor>,
    buf: &[u8],
    registry: &ExtensionRegistry,
) -> Result<DynamicMessage, Error> {
    deserialize_with_options(descriptor, buf, registry, &ParseOptions::default())
}

/// [deserialize] with explicit [ParseOptions].
pub fn deserialize_with_options(
    descriptor: &Arc<MessageDescriptor>,
    buf: &[u8],
    registry: &ExtensionRegistry,
    options: &ParseOptions,
) -> Result<DynamicMessage, Error> {
    let mut msg = DynamicMessage::new(Arc::clone(descriptor));
    codec::merge_from_slice(&mut msg, buf, registry, options)?;
    Ok(msg)
}

/// Parse everything `reader` yields as a message of type `descriptor`.
pub fn deserialize_from_reader<R: std::io::Read>(
    descriptor: &Arc<MessageDescriptor>,
    reader: &mut R,
    registry: &ExtensionRegistry,
) -> Result<DynamicMessage, std::io::Error> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    deserialize(descriptor, &buf, registry)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////
