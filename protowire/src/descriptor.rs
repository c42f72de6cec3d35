//! Runtime schema metadata.  Descriptors are immutable once built and shared through `Arc`, so a
//! single schema can serve any number of concurrent parses.

use std::sync::Arc;

use super::{Cardinality, Error, FieldNumber, FieldType, WireType};

////////////////////////////////////////// FieldDescriptor /////////////////////////////////////////

/// FieldDescriptor describes one field of a message type, or one extension.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDescriptor {
    number: FieldNumber,
    name: String,
    field_type: FieldType,
    cardinality: Cardinality,
    packed: bool,
    message_type: Option<Arc<MessageDescriptor>>,
}

impl FieldDescriptor {
    /// Describe a scalar, string, or bytes field.
    pub fn new(
        number: u32,
        name: &str,
        field_type: FieldType,
        cardinality: Cardinality,
    ) -> Result<Self, Error> {
        if matches!(field_type, FieldType::Message | FieldType::Group) {
            return Err(Error::InvalidDescriptor {
                name: name.to_string(),
                what: "message and group fields need a message type",
            });
        }
        Self::create(number, name, field_type, cardinality, None)
    }

    /// Describe a length-delimited embedded message field.
    pub fn new_message(
        number: u32,
        name: &str,
        cardinality: Cardinality,
        message_type: &Arc<MessageDescriptor>,
    ) -> Result<Self, Error> {
        Self::create(
            number,
            name,
            FieldType::Message,
            cardinality,
            Some(Arc::clone(message_type)),
        )
    }

    /// Describe a group field.  The group's fields are described by `message_type`.
    pub fn new_group(
        number: u32,
        name: &str,
        cardinality: Cardinality,
        message_type: &Arc<MessageDescriptor>,
    ) -> Result<Self, Error> {
        Self::create(
            number,
            name,
            FieldType::Group,
            cardinality,
            Some(Arc::clone(message_type)),
        )
    }

    fn create(
        number: u32,
        name: &str,
        field_type: FieldType,
        cardinality: Cardinality,
        message_type: Option<Arc<MessageDescriptor>>,
    ) -> Result<Self, Error> {
        let number = FieldNumber::new(number)?;
        if number.is_reserved() {
            return Err(Error::InvalidFieldNumber {
                field_number: number.get() as u64,
                what: "field is reserved",
            });
        }
        Ok(Self {
            number,
            name: name.to_string(),
            field_type,
            cardinality,
            packed: false,
            message_type,
        })
    }

    /// Write this repeated field as a single packed run.
    pub fn packed(mut self) -> Result<Self, Error> {
        if self.cardinality != Cardinality::Repeated || !self.field_type.is_packable() {
            return Err(Error::InvalidDescriptor {
                name: self.name,
                what: "only repeated scalar fields may be packed",
            });
        }
        self.packed = true;
        Ok(self)
    }

    pub fn number(&self) -> FieldNumber {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// The wire type of a single, unpacked value.
    pub fn wire_type(&self) -> WireType {
        self.field_type.wire_type()
    }

    /// The type of an embedded message or group; `None` for every other field type.
    pub fn message_type(&self) -> Option<&Arc<MessageDescriptor>> {
        self.message_type.as_ref()
    }
}

///////////////////////////////////////// MessageDescriptor ////////////////////////////////////////

/// MessageDescriptor describes a message type:  its fields in ascending number order, the ranges
/// set aside for extensions, and whether it uses the message-set wire format.
#[derive(Debug, Eq, PartialEq)]
pub struct MessageDescriptor {
    full_name: String,
    fields: Vec<FieldDescriptor>,
    extension_ranges: Vec<(u32, u32)>,
    message_set_wire_format: bool,
}

impl MessageDescriptor {
    pub fn builder(full_name: &str) -> MessageDescriptorBuilder {
        MessageDescriptorBuilder::new(full_name)
    }

    /// The fully-qualified type name; registries key extensions by it.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// All fields, ascending by number.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields
            .binary_search_by_key(&number, |f| f.number.get())
            .ok()
            .map(|idx| &self.fields[idx])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Inclusive ranges of numbers reserved for extensions.
    pub fn extension_ranges(&self) -> &[(u32, u32)] {
        &self.extension_ranges
    }

    pub fn is_extension_number(&self, number: u32) -> bool {
        self.extension_ranges
            .iter()
            .any(|(first, last)| *first <= number && number <= *last)
    }

    pub fn message_set_wire_format(&self) -> bool {
        self.message_set_wire_format
    }
}

///////////////////////////////////// MessageDescriptorBuilder /////////////////////////////////////

/// Collects a message type's fields and validates them together.
#[derive(Clone, Debug)]
pub struct MessageDescriptorBuilder {
    full_name: String,
    fields: Vec<FieldDescriptor>,
    extension_ranges: Vec<(u32, u32)>,
    message_set_wire_format: bool,
}

impl MessageDescriptorBuilder {
    pub fn new(full_name: &str) -> Self {
        Self {
            full_name: full_name.to_string(),
            fields: Vec::new(),
            extension_ranges: Vec::new(),
            message_set_wire_format: false,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Reserve `first..=last` for extensions.
    pub fn extension_range(mut self, first: u32, last: u32) -> Self {
        self.extension_ranges.push((first, last));
        self
    }

    /// Carry extensions as message-set items.
    pub fn message_set_wire_format(mut self) -> Self {
        self.message_set_wire_format = true;
        self
    }

    pub fn build(self) -> Result<Arc<MessageDescriptor>, Error> {
        let invalid = |what: &'static str| Error::InvalidDescriptor {
            name: self.full_name.clone(),
            what,
        };
        let mut extension_ranges = self.extension_ranges.clone();
        extension_ranges.sort();
        for (first, last) in extension_ranges.iter() {
            FieldNumber::new(*first)?;
            FieldNumber::new(*last)?;
            if first > last {
                return Err(invalid("extension range ends before it starts"));
            }
        }
        for pair in extension_ranges.windows(2) {
            if pair[0].1 >= pair[1].0 {
                return Err(invalid("extension ranges overlap"));
            }
        }
        let mut fields = self.fields.clone();
        fields.sort_by_key(|f| f.number);
        for pair in fields.windows(2) {
            if pair[0].number == pair[1].number {
                return Err(invalid("duplicate field number"));
            }
        }
        for (idx, field) in fields.iter().enumerate() {
            if fields[idx + 1..].iter().any(|f| f.name == field.name) {
                return Err(invalid("duplicate field name"));
            }
            let number = field.number.get();
            if extension_ranges
                .iter()
                .any(|(first, last)| *first <= number && number <= *last)
            {
                return Err(invalid("field number inside an extension range"));
            }
            if self.message_set_wire_format && number == 1 {
                return Err(invalid("field 1 of a message set carries its items"));
            }
        }
        Ok(Arc::new(MessageDescriptor {
            full_name: self.full_name,
            fields,
            extension_ranges,
            message_set_wire_format: self.message_set_wire_format,
        }))
    }
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn int32(number: u32, name: &str) -> FieldDescriptor {
        FieldDescriptor::new(number, name, FieldType::Int32, Cardinality::Optional).unwrap()
    }

    #[test]
    fn fields_sorted_by_number() {
        let desc = MessageDescriptor::builder("test.Sorted")
            .field(int32(5, "five"))
            .field(int32(1, "one"))
            .field(int32(4, "four"))
            .build()
            .unwrap();
        let numbers: Vec<u32> = desc.fields().iter().map(|f| f.number().get()).collect();
        assert_eq!(vec![1, 4, 5], numbers);
        assert_eq!("four", desc.field(4).unwrap().name());
        assert!(desc.field(2).is_none());
        assert_eq!(5, desc.field_by_name("five").unwrap().number().get());
    }

    #[test]
    fn duplicate_numbers() {
        let got = MessageDescriptor::builder("test.Dup")
            .field(int32(1, "a"))
            .field(int32(1, "b"))
            .build();
        assert_eq!(
            Err(Error::InvalidDescriptor {
                name: "test.Dup".to_string(),
                what: "duplicate field number",
            }),
            got
        );
    }

    #[test]
    fn duplicate_names() {
        let got = MessageDescriptor::builder("test.Dup")
            .field(int32(1, "a"))
            .field(int32(2, "a"))
            .build();
        assert!(matches!(got, Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn field_inside_extension_range() {
        let got = MessageDescriptor::builder("test.Ext")
            .field(int32(10, "a"))
            .extension_range(5, 100)
            .build();
        assert_eq!(
            Err(Error::InvalidDescriptor {
                name: "test.Ext".to_string(),
                what: "field number inside an extension range",
            }),
            got
        );
    }

    #[test]
    fn extension_ranges() {
        let desc = MessageDescriptor::builder("test.Ext")
            .field(int32(1, "a"))
            .extension_range(12, 100)
            .extension_range(2, 10)
            .build()
            .unwrap();
        assert_eq!(&[(2, 10), (12, 100)], desc.extension_ranges());
        assert!(!desc.is_extension_number(1));
        assert!(desc.is_extension_number(2));
        assert!(desc.is_extension_number(10));
        assert!(!desc.is_extension_number(11));
        assert!(desc.is_extension_number(100));
        assert!(!desc.is_extension_number(101));
    }

    #[test]
    fn overlapping_ranges() {
        let got = MessageDescriptor::builder("test.Ext")
            .extension_range(2, 10)
            .extension_range(10, 20)
            .build();
        assert!(matches!(got, Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn reserved_and_invalid_numbers() {
        assert!(matches!(
            FieldDescriptor::new(19500, "r", FieldType::Int32, Cardinality::Optional),
            Err(Error::InvalidFieldNumber {
                field_number: 19500,
                what: "field is reserved"
            })
        ));
        assert!(matches!(
            FieldDescriptor::new(0, "z", FieldType::Int32, Cardinality::Optional),
            Err(Error::InvalidFieldNumber { .. })
        ));
    }

    #[test]
    fn packed_needs_repeated_scalar() {
        let repeated =
            FieldDescriptor::new(1, "r", FieldType::SInt64, Cardinality::Repeated).unwrap();
        assert!(repeated.packed().unwrap().is_packed());
        let optional = int32(1, "o");
        assert!(optional.packed().is_err());
        let strings =
            FieldDescriptor::new(1, "s", FieldType::String, Cardinality::Repeated).unwrap();
        assert!(strings.packed().is_err());
    }

    #[test]
    fn message_fields_need_a_type() {
        assert!(FieldDescriptor::new(1, "m", FieldType::Message, Cardinality::Optional).is_err());
        let nested = MessageDescriptor::builder("test.Nested").build().unwrap();
        let field =
            FieldDescriptor::new_message(1, "m", Cardinality::Optional, &nested).unwrap();
        assert_eq!(WireType::LengthDelimited, field.wire_type());
        assert_eq!("test.Nested", field.message_type().unwrap().full_name());
        let group = FieldDescriptor::new_group(2, "g", Cardinality::Optional, &nested).unwrap();
        assert_eq!(WireType::StartGroup, group.wire_type());
    }

    #[test]
    fn message_set_reserves_field_one() {
        let got = MessageDescriptor::builder("test.Set")
            .message_set_wire_format()
            .field(int32(1, "nope"))
            .build();
        assert!(matches!(got, Err(Error::InvalidDescriptor { .. })));
        let ok = MessageDescriptor::builder("test.Set")
            .message_set_wire_format()
            .extension_range(4, crate::LAST_FIELD_NUMBER)
            .build()
            .unwrap();
        assert!(ok.message_set_wire_format());
    }
}
