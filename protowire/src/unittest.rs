//! Reference schemas shared by the tests and the benchmark harness.
//!
//! Every schema is built once and cached.  The builders (`all_set` and friends) fill in every
//! field with a value derived from the field's number, so two calls produce equal messages.

use std::sync::{Arc, OnceLock};

use super::{
    message_set, Cardinality, DynamicMessage, Error, ExtensionDescriptor, ExtensionRegistry,
    FieldDescriptor, FieldType, MessageBuilder, MessageDescriptor, Value, LAST_FIELD_NUMBER,
};

/// The type id of [test_message_set_extension1] within [test_message_set].
pub const MESSAGE_SET_TYPE_ID1: u32 = 1545008;
/// The type id of [test_message_set_extension2] within [test_message_set].
pub const MESSAGE_SET_TYPE_ID2: u32 = 1547769;
/// A type id no schema here declares.
pub const MESSAGE_SET_UNKNOWN_TYPE_ID: u32 = 1550055;

// Scalar kinds in field-number order.  Optional fields are 1..=15, repeated fields 31..=45, and
// the first thirteen double as the packed fields 90..=102.
const SCALARS: [(&str, FieldType); 15] = [
    ("int32", FieldType::Int32),
    ("int64", FieldType::Int64),
    ("uint32", FieldType::UInt32),
    ("uint64", FieldType::UInt64),
    ("sint32", FieldType::SInt32),
    ("sint64", FieldType::SInt64),
    ("fixed32", FieldType::Fixed32),
    ("fixed64", FieldType::Fixed64),
    ("sfixed32", FieldType::SFixed32),
    ("sfixed64", FieldType::SFixed64),
    ("float", FieldType::Float),
    ("double", FieldType::Double),
    ("bool", FieldType::Bool),
    ("string", FieldType::String),
    ("bytes", FieldType::Bytes),
];

// A schema that fails to build keeps failing with the same error.
type Cached = OnceLock<Result<Arc<MessageDescriptor>, Error>>;
type CachedExtensions = OnceLock<Result<Vec<Arc<ExtensionDescriptor>>, Error>>;

fn cached(
    cell: &'static Cached,
    build: fn() -> Result<Arc<MessageDescriptor>, Error>,
) -> Result<Arc<MessageDescriptor>, Error> {
    cell.get_or_init(build).clone()
}

fn cached_extensions(
    cell: &'static CachedExtensions,
    build: fn() -> Result<Vec<Arc<ExtensionDescriptor>>, Error>,
) -> Result<&'static [Arc<ExtensionDescriptor>], Error> {
    match cell.get_or_init(build) {
        Ok(extensions) => Ok(extensions),
        Err(err) => Err(err.clone()),
    }
}

fn optional(number: u32, name: &str, field_type: FieldType) -> Result<FieldDescriptor, Error> {
    FieldDescriptor::new(number, name, field_type, Cardinality::Optional)
}

fn repeated(number: u32, name: &str, field_type: FieldType) -> Result<FieldDescriptor, Error> {
    FieldDescriptor::new(number, name, field_type, Cardinality::Repeated)
}

fn single_int32(full_name: &str, number: u32, name: &str) -> Result<Arc<MessageDescriptor>, Error> {
    MessageDescriptor::builder(full_name)
        .field(optional(number, name, FieldType::Int32)?)
        .build()
}

/////////////////////////////////////////// TestAllTypes ///////////////////////////////////////////

static NESTED_MESSAGE: Cached = OnceLock::new();
static FOREIGN_MESSAGE: Cached = OnceLock::new();
static OPTIONAL_GROUP: Cached = OnceLock::new();
static REPEATED_GROUP: Cached = OnceLock::new();
static OPTIONAL_GROUP_EXTENSION: Cached = OnceLock::new();
static REPEATED_GROUP_EXTENSION: Cached = OnceLock::new();
static TEST_ALL_TYPES: Cached = OnceLock::new();
static TEST_ALL_EXTENSIONS: Cached = OnceLock::new();
static ALL_EXTENSIONS: CachedExtensions = OnceLock::new();

/// `TestAllTypes.NestedMessage { optional int32 bb = 1; }`
pub fn nested_message() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&NESTED_MESSAGE, || {
        single_int32("protobuf_unittest.TestAllTypes.NestedMessage", 1, "bb")
    })
}

/// `ForeignMessage { optional int32 c = 1; }`
pub fn foreign_message() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&FOREIGN_MESSAGE, || {
        single_int32("protobuf_unittest.ForeignMessage", 1, "c")
    })
}

fn optional_group() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&OPTIONAL_GROUP, || {
        single_int32("protobuf_unittest.TestAllTypes.OptionalGroup", 17, "a")
    })
}

fn repeated_group() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&REPEATED_GROUP, || {
        single_int32("protobuf_unittest.TestAllTypes.RepeatedGroup", 47, "a")
    })
}

fn optional_group_extension() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&OPTIONAL_GROUP_EXTENSION, || {
        single_int32("protobuf_unittest.OptionalGroup_extension", 17, "a")
    })
}

fn repeated_group_extension() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&REPEATED_GROUP_EXTENSION, || {
        single_int32("protobuf_unittest.RepeatedGroup_extension", 47, "a")
    })
}

// The TestAllTypes field list.  Extensions carry the same numbers with an `_extension` suffix.
fn all_types_fields(
    suffix: &str,
    optional_group: &Arc<MessageDescriptor>,
    repeated_group: &Arc<MessageDescriptor>,
) -> Result<Vec<FieldDescriptor>, Error> {
    let mut fields = Vec::new();
    for (idx, (name, field_type)) in SCALARS.iter().enumerate() {
        let idx = idx as u32;
        fields.push(optional(
            1 + idx,
            &format!("optional_{name}{suffix}"),
            *field_type,
        )?);
        fields.push(repeated(
            31 + idx,
            &format!("repeated_{name}{suffix}"),
            *field_type,
        )?);
    }
    fields.push(FieldDescriptor::new_group(
        16,
        &format!("optionalgroup{suffix}"),
        Cardinality::Optional,
        optional_group,
    )?);
    fields.push(FieldDescriptor::new_message(
        18,
        &format!("optional_nested_message{suffix}"),
        Cardinality::Optional,
        &nested_message()?,
    )?);
    fields.push(FieldDescriptor::new_message(
        19,
        &format!("optional_foreign_message{suffix}"),
        Cardinality::Optional,
        &foreign_message()?,
    )?);
    fields.push(optional(
        21,
        &format!("optional_nested_enum{suffix}"),
        FieldType::Enum,
    )?);
    fields.push(FieldDescriptor::new_group(
        46,
        &format!("repeatedgroup{suffix}"),
        Cardinality::Repeated,
        repeated_group,
    )?);
    fields.push(FieldDescriptor::new_message(
        48,
        &format!("repeated_nested_message{suffix}"),
        Cardinality::Repeated,
        &nested_message()?,
    )?);
    fields.push(FieldDescriptor::new_message(
        49,
        &format!("repeated_foreign_message{suffix}"),
        Cardinality::Repeated,
        &foreign_message()?,
    )?);
    fields.push(repeated(
        51,
        &format!("repeated_nested_enum{suffix}"),
        FieldType::Enum,
    )?);
    Ok(fields)
}

/// Every field type, singular and repeated.
pub fn test_all_types() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_ALL_TYPES, || {
        let mut builder = MessageDescriptor::builder("protobuf_unittest.TestAllTypes");
        for field in all_types_fields("", &optional_group()?, &repeated_group()?)? {
            builder = builder.field(field);
        }
        builder.build()
    })
}

/// A message with no fields whose whole number space is open to extensions.
pub fn test_all_extensions() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_ALL_EXTENSIONS, || {
        MessageDescriptor::builder("protobuf_unittest.TestAllExtensions")
            .extension_range(1, LAST_FIELD_NUMBER)
            .build()
    })
}

/// The TestAllTypes fields, declared as extensions of [test_all_extensions].
pub fn all_extensions() -> Result<&'static [Arc<ExtensionDescriptor>], Error> {
    cached_extensions(&ALL_EXTENSIONS, || {
        let extendee = test_all_extensions()?;
        all_types_fields(
            "_extension",
            &optional_group_extension()?,
            &repeated_group_extension()?,
        )?
        .into_iter()
        .map(|field| ExtensionDescriptor::new(&extendee, field))
        .collect()
    })
}

/// A TestAllTypes with every field set.
pub fn all_set() -> Result<DynamicMessage, Error> {
    let descriptor = test_all_types()?;
    let mut builder = MessageBuilder::new(Arc::clone(&descriptor));
    for field in descriptor.fields() {
        for value in sample_values(field)? {
            if field.is_repeated() {
                builder.add_repeated(field.number().get(), value)?;
            } else {
                builder.set_field(field.number().get(), value)?;
            }
        }
    }
    Ok(builder.build())
}

/// A TestAllExtensions with every extension set to the value [all_set] gives its field.
pub fn all_extensions_set() -> Result<DynamicMessage, Error> {
    let mut builder = MessageBuilder::new(test_all_extensions()?);
    for extension in all_extensions()? {
        for value in sample_values(extension.field())? {
            if extension.field().is_repeated() {
                builder.add_extension(extension, value)?;
            } else {
                builder.set_extension(extension, value)?;
            }
        }
    }
    Ok(builder.build())
}

////////////////////////////////////////// TestPackedTypes /////////////////////////////////////////

static TEST_PACKED_TYPES: Cached = OnceLock::new();
static TEST_UNPACKED_TYPES: Cached = OnceLock::new();

fn packable_fields(prefix: &str, packed: bool) -> Result<Vec<FieldDescriptor>, Error> {
    let mut fields = Vec::new();
    let kinds = SCALARS[..13]
        .iter()
        .copied()
        .chain(std::iter::once(("enum", FieldType::Enum)));
    for (idx, (name, field_type)) in kinds.enumerate() {
        let field = repeated(90 + idx as u32, &format!("{prefix}_{name}"), field_type)?;
        fields.push(if packed { field.packed()? } else { field });
    }
    Ok(fields)
}

/// Packed repeated fields 90..=103.
pub fn test_packed_types() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_PACKED_TYPES, || {
        let mut builder = MessageDescriptor::builder("protobuf_unittest.TestPackedTypes");
        for field in packable_fields("packed", true)? {
            builder = builder.field(field);
        }
        builder.build()
    })
}

/// [test_packed_types] with the same numbers written one tag per element.
pub fn test_unpacked_types() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_UNPACKED_TYPES, || {
        let mut builder = MessageDescriptor::builder("protobuf_unittest.TestUnpackedTypes");
        for field in packable_fields("unpacked", false)? {
            builder = builder.field(field);
        }
        builder.build()
    })
}

fn repeated_set(descriptor: Arc<MessageDescriptor>) -> Result<DynamicMessage, Error> {
    let mut builder = MessageBuilder::new(Arc::clone(&descriptor));
    for field in descriptor.fields() {
        for value in sample_values(field)? {
            builder.add_repeated(field.number().get(), value)?;
        }
    }
    Ok(builder.build())
}

pub fn packed_set() -> Result<DynamicMessage, Error> {
    repeated_set(test_packed_types()?)
}

/// The values of [packed_set], unpacked.
pub fn unpacked_set() -> Result<DynamicMessage, Error> {
    repeated_set(test_unpacked_types()?)
}

//////////////////////////////////////// TestFieldOrderings ////////////////////////////////////////

static TEST_FIELD_ORDERINGS: Cached = OnceLock::new();
static FIELD_ORDERINGS_EXTENSIONS: CachedExtensions = OnceLock::new();

/// Fields 1, 11, and 101 around the extension ranges 2..=10 and 12..=100.
pub fn test_field_orderings() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_FIELD_ORDERINGS, || {
        MessageDescriptor::builder("protobuf_unittest.TestFieldOrderings")
            .field(optional(11, "my_string", FieldType::String)?)
            .field(optional(1, "my_int", FieldType::Int64)?)
            .field(optional(101, "my_float", FieldType::Float)?)
            .extension_range(2, 10)
            .extension_range(12, 100)
            .build()
    })
}

/// `my_extension_string = 50` and `my_extension_int = 5`.
pub fn field_orderings_extensions() -> Result<&'static [Arc<ExtensionDescriptor>], Error> {
    cached_extensions(&FIELD_ORDERINGS_EXTENSIONS, || {
        let extendee = test_field_orderings()?;
        Ok(vec![
            ExtensionDescriptor::new(
                &extendee,
                optional(50, "my_extension_string", FieldType::String)?,
            )?,
            ExtensionDescriptor::new(&extendee, optional(5, "my_extension_int", FieldType::Int32)?)?,
        ])
    })
}

/// A TestFieldOrderings with fields and extensions set in no particular order.
pub fn field_orderings_set() -> Result<DynamicMessage, Error> {
    let extensions = field_orderings_extensions()?;
    let mut builder = MessageBuilder::new(test_field_orderings()?);
    builder
        .set_field(11, Value::String("foo".to_string()))?
        .set_extension(&extensions[0], Value::String("bar".to_string()))?
        .set_field(1, Value::I64(1))?
        .set_extension(&extensions[1], Value::I32(23))?
        .set_field(101, Value::F32(1.0))?;
    Ok(builder.build())
}

////////////////////////////////////////// TestInterleaved /////////////////////////////////////////

static TEST_INTERLEAVED_A: Cached = OnceLock::new();
static TEST_INTERLEAVED_B: Cached = OnceLock::new();
static INTERLEAVED_EXTENSIONS: CachedExtensions = OnceLock::new();

fn interleaved_fields() -> Result<Vec<FieldDescriptor>, Error> {
    Ok(vec![
        optional(1, "id", FieldType::Int32)?,
        optional(4, "name", FieldType::String)?,
        repeated(5, "tags", FieldType::UInt64)?,
    ])
}

/// Fields 1, 4, and 5, with 1000 and 1001 left to extensions.
pub fn test_interleaved_a() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_INTERLEAVED_A, || {
        let mut builder = MessageDescriptor::builder("protobuf_unittest.TestInterleavedA")
            .extension_range(1000, 1999);
        for field in interleaved_fields()? {
            builder = builder.field(field);
        }
        builder.build()
    })
}

/// `note = 1000` and `weight = 1001`, extending [test_interleaved_a].
pub fn interleaved_extensions() -> Result<&'static [Arc<ExtensionDescriptor>], Error> {
    cached_extensions(&INTERLEAVED_EXTENSIONS, || {
        let extendee = test_interleaved_a()?;
        Ok(vec![
            ExtensionDescriptor::new(&extendee, optional(1000, "note", FieldType::String)?)?,
            ExtensionDescriptor::new(&extendee, optional(1001, "weight", FieldType::SInt64)?)?,
        ])
    })
}

/// [test_interleaved_a] with its extensions declared as plain fields.
pub fn test_interleaved_b() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_INTERLEAVED_B, || {
        let mut builder = MessageDescriptor::builder("protobuf_unittest.TestInterleavedB")
            .field(optional(1001, "weight", FieldType::SInt64)?)
            .field(optional(1000, "note", FieldType::String)?);
        for field in interleaved_fields()? {
            builder = builder.field(field);
        }
        builder.build()
    })
}

/////////////////////////////////////////// TestMessageSet //////////////////////////////////////////

static TEST_MESSAGE_SET: Cached = OnceLock::new();
static TEST_MESSAGE_SET_EXTENSION1: Cached = OnceLock::new();
static TEST_MESSAGE_SET_EXTENSION2: Cached = OnceLock::new();
static MESSAGE_SET_EXTENSIONS: CachedExtensions = OnceLock::new();
static RAW_MESSAGE_SET: Cached = OnceLock::new();

/// A message set open to extensions from 4 up.
pub fn test_message_set() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_MESSAGE_SET, || {
        MessageDescriptor::builder("protobuf_unittest.TestMessageSet")
            .message_set_wire_format()
            .extension_range(4, LAST_FIELD_NUMBER)
            .build()
    })
}

/// `TestMessageSetExtension1 { optional int32 i = 15; }`
pub fn test_message_set_extension1() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_MESSAGE_SET_EXTENSION1, || {
        single_int32("protobuf_unittest.TestMessageSetExtension1", 15, "i")
    })
}

/// `TestMessageSetExtension2 { optional string str = 25; }`
pub fn test_message_set_extension2() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&TEST_MESSAGE_SET_EXTENSION2, || {
        MessageDescriptor::builder("protobuf_unittest.TestMessageSetExtension2")
            .field(optional(25, "str", FieldType::String)?)
            .build()
    })
}

/// The two payload types, at [MESSAGE_SET_TYPE_ID1] and [MESSAGE_SET_TYPE_ID2].
pub fn message_set_extensions() -> Result<&'static [Arc<ExtensionDescriptor>], Error> {
    cached_extensions(&MESSAGE_SET_EXTENSIONS, || {
        let extendee = test_message_set()?;
        Ok(vec![
            ExtensionDescriptor::new(
                &extendee,
                FieldDescriptor::new_message(
                    MESSAGE_SET_TYPE_ID1,
                    "message_set_extension",
                    Cardinality::Optional,
                    &test_message_set_extension1()?,
                )?,
            )?,
            ExtensionDescriptor::new(
                &extendee,
                FieldDescriptor::new_message(
                    MESSAGE_SET_TYPE_ID2,
                    "message_set_extension2",
                    Cardinality::Optional,
                    &test_message_set_extension2()?,
                )?,
            )?,
        ])
    })
}

/// [message_set::raw_message_set_descriptor], cached.
pub fn raw_message_set() -> Result<Arc<MessageDescriptor>, Error> {
    cached(&RAW_MESSAGE_SET, message_set::raw_message_set_descriptor)
}

/////////////////////////////////////////////// lookup /////////////////////////////////////////////

/// Register every extension declared in this module.
pub fn register_all_extensions(registry: &mut ExtensionRegistry) -> Result<(), Error> {
    let all = all_extensions()?
        .iter()
        .chain(field_orderings_extensions()?)
        .chain(interleaved_extensions()?)
        .chain(message_set_extensions()?);
    for extension in all {
        registry.add(Arc::clone(extension))?;
    }
    Ok(())
}

/// A frozen registry holding every extension declared in this module.
pub fn registry() -> Result<ExtensionRegistry, Error> {
    let mut registry = ExtensionRegistry::new();
    register_all_extensions(&mut registry)?;
    Ok(registry.as_read_only())
}

/// The top-level schema with full name `full_name`, or the same name with its package left off.
pub fn by_name(full_name: &str) -> Result<Option<Arc<MessageDescriptor>>, Error> {
    let schemas = [
        test_all_types()?,
        test_all_extensions()?,
        test_packed_types()?,
        test_unpacked_types()?,
        test_field_orderings()?,
        test_interleaved_a()?,
        test_interleaved_b()?,
        test_message_set()?,
        test_message_set_extension1()?,
        test_message_set_extension2()?,
        raw_message_set()?,
        nested_message()?,
        foreign_message()?,
    ];
    Ok(schemas.into_iter().find(|schema| {
        schema.full_name() == full_name
            || schema.full_name().strip_prefix("protobuf_unittest.") == Some(full_name)
    }))
}

////////////////////////////////////////////// samples /////////////////////////////////////////////

/// A deterministic value of `field_type` derived from `seed`, or `None` for messages and groups.
pub fn sample(field_type: FieldType, seed: u32) -> Option<Value> {
    let signed = seed as i32;
    Some(match field_type {
        FieldType::Double => Value::F64(seed as f64 + 0.5),
        FieldType::Float => Value::F32(seed as f32 + 0.5),
        FieldType::Int64 => Value::I64(-(seed as i64) * 1_000_003),
        FieldType::UInt64 => Value::U64(seed as u64 * 1_000_003),
        FieldType::Int32 => Value::I32(-signed),
        FieldType::Fixed64 => Value::U64(u64::MAX - seed as u64),
        FieldType::Fixed32 => Value::U32(seed),
        FieldType::Bool => Value::Bool(seed % 2 == 1),
        FieldType::String => Value::String(seed.to_string()),
        FieldType::Bytes => Value::Bytes(seed.to_string().into_bytes()),
        FieldType::UInt32 => Value::U32(seed << 8),
        FieldType::Enum => Value::Enum(1 + signed % 3),
        FieldType::SFixed32 => Value::I32(-signed),
        FieldType::SFixed64 => Value::I64(-(seed as i64)),
        FieldType::SInt32 => Value::I32(-signed),
        FieldType::SInt64 => Value::I64(-(seed as i64) << 20),
        FieldType::Group | FieldType::Message => {
            return None;
        }
    })
}

// One value for a singular field, two for a repeated one.
fn sample_values(field: &FieldDescriptor) -> Result<Vec<Value>, Error> {
    let number = field.number().get();
    let seeds = if field.is_repeated() {
        vec![200 + number, 300 + number]
    } else {
        vec![100 + number]
    };
    let mut values = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let value = match (sample(field.field_type(), seed), field.message_type()) {
            (Some(value), _) => value,
            (None, Some(message_type)) => Value::Message(sample_message(message_type, seed)?),
            (None, None) => {
                return Err(Error::InvalidDescriptor {
                    name: field.name().to_string(),
                    what: "message and group fields need a message type",
                });
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn sample_message(descriptor: &Arc<MessageDescriptor>, seed: u32) -> Result<DynamicMessage, Error> {
    let mut builder = MessageBuilder::new(Arc::clone(descriptor));
    for field in descriptor.fields() {
        if let Some(value) = sample(field.field_type(), seed + field.number().get()) {
            if field.is_repeated() {
                builder.add_repeated(field.number().get(), value)?;
            } else {
                builder.set_field(field.number().get(), value)?;
            }
        }
    }
    Ok(builder.build())
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////
