use std::sync::Arc;

use protowire::unittest;
use protowire::{
    deserialize, read_tag, serialize, ExtensionRegistry, FieldNumber, Message, MessageBuilder,
    UnknownFieldSet, Value,
};
use wirebuf::CodedInput;

// Field numbers of every tag in `buf`, in wire order.
fn tag_numbers(buf: &[u8]) -> Vec<u32> {
    let mut input = CodedInput::new(buf);
    let mut numbers = Vec::new();
    while let Some(tag) = read_tag(&mut input).unwrap() {
        numbers.push(tag.field_number.get());
        UnknownFieldSet::new().merge_field_from(tag, &mut input).unwrap();
    }
    numbers
}

fn interleaved_registry() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    for extension in unittest::interleaved_extensions().unwrap() {
        registry.add(Arc::clone(extension)).unwrap();
    }
    registry.as_read_only()
}

proptest::proptest! {
    #[test]
    fn scalars_round_trip(
        a: i32,
        b: i64,
        c: u32,
        d: u64,
        e: i32,
        f: i64,
        s: String,
        bytes: Vec<u8>,
        r: Vec<i32>,
    ) {
        let mut builder = MessageBuilder::new(unittest::test_all_types().unwrap());
        builder
            .set_field(1, Value::I32(a)).unwrap()
            .set_field(2, Value::I64(b)).unwrap()
            .set_field(3, Value::U32(c)).unwrap()
            .set_field(4, Value::U64(d)).unwrap()
            .set_field(5, Value::I32(e)).unwrap()
            .set_field(6, Value::I64(f)).unwrap()
            .set_field(14, Value::String(s)).unwrap()
            .set_field(15, Value::Bytes(bytes)).unwrap();
        for x in r {
            builder.add_repeated(35, Value::I32(x)).unwrap();
        }
        let m = builder.build();
        let buf = serialize(&m);
        proptest::prop_assert_eq!(buf.len(), m.serialized_size());
        let parsed = deserialize(&unittest::test_all_types().unwrap(), &buf, ExtensionRegistry::empty()).unwrap();
        proptest::prop_assert_eq!(m, parsed);
    }

    #[test]
    fn unknown_fields_round_trip(varints: Vec<(u32, u64)>, fixed: Vec<(u32, u32)>, blobs: Vec<(u32, Vec<u8>)>) {
        // 600..=699 is unused by TestAllTypes
        let mut unknown = UnknownFieldSet::new();
        for (n, v) in varints {
            unknown.merge_varint(FieldNumber::new(600 + n % 100).unwrap(), v);
        }
        for (n, v) in fixed {
            unknown.merge_fixed32(FieldNumber::new(600 + n % 100).unwrap(), v);
        }
        for (n, v) in blobs {
            unknown.merge_length_delimited(FieldNumber::new(600 + n % 100).unwrap(), v);
        }
        let mut builder = MessageBuilder::new(unittest::test_all_types().unwrap());
        builder.set_field(1, Value::I32(1)).unwrap();
        builder.set_unknown_fields(unknown);
        let m = builder.build();
        let buf = serialize(&m);
        proptest::prop_assert_eq!(buf.len(), m.serialized_size());
        let parsed = deserialize(&unittest::test_all_types().unwrap(), &buf, ExtensionRegistry::empty()).unwrap();
        proptest::prop_assert_eq!(&buf, &serialize(&parsed));
        proptest::prop_assert_eq!(m, parsed);
    }

    #[test]
    fn arbitrary_bytes_do_not_panic(buf: Vec<u8>) {
        let registry = unittest::registry().unwrap();
        for schema in [unittest::test_all_types().unwrap(), unittest::test_message_set().unwrap(), unittest::test_all_extensions().unwrap()] {
            if let Ok(m) = deserialize(&schema, &buf, &registry) {
                let out = serialize(&m);
                proptest::prop_assert_eq!(out.len(), m.serialized_size());
            }
        }
    }

    #[test]
    fn interleaved_messages_serialize_in_tag_order(
        id: Option<i32>,
        name: Option<String>,
        tags: Vec<u64>,
        note: Option<String>,
        weight: Option<i64>,
        low_varints: Vec<(u32, u64)>,
        high_blobs: Vec<(u32, Vec<u8>)>,
    ) {
        let extensions = unittest::interleaved_extensions().unwrap();
        let mut builder = MessageBuilder::new(unittest::test_interleaved_a().unwrap());
        // set extensions first so encounter order cannot produce the wire order by accident
        if let Some(weight) = weight {
            builder.set_extension(&extensions[1], Value::I64(weight)).unwrap();
        }
        if let Some(note) = note {
            builder.set_extension(&extensions[0], Value::String(note)).unwrap();
        }
        let mut unknown = UnknownFieldSet::new();
        for (n, v) in low_varints {
            // between the known fields and the extensions: 6..=999
            unknown.merge_varint(FieldNumber::new(6 + n % 994).unwrap(), v);
        }
        for (n, v) in high_blobs {
            // after the registered extensions: 1002..=1999
            unknown.merge_length_delimited(FieldNumber::new(1002 + n % 998).unwrap(), v);
        }
        builder.set_unknown_fields(unknown);
        for t in tags {
            builder.add_repeated(5, Value::U64(t)).unwrap();
        }
        if let Some(name) = name {
            builder.set_field(4, Value::String(name)).unwrap();
        }
        if let Some(id) = id {
            builder.set_field(1, Value::I32(id)).unwrap();
        }
        let m = builder.build();

        let buf = serialize(&m);
        proptest::prop_assert_eq!(buf.len(), m.serialized_size());
        let numbers = tag_numbers(&buf);
        proptest::prop_assert!(
            numbers.windows(2).all(|w| w[0] <= w[1]),
            "tags out of order: {:?}",
            numbers
        );

        let registry = interleaved_registry();
        let parsed = deserialize(&unittest::test_interleaved_a().unwrap(), &buf, &registry).unwrap();
        proptest::prop_assert_eq!(&buf, &serialize(&parsed));
        proptest::prop_assert_eq!(m, parsed);
    }
}
