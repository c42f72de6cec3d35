//! Extensions and the registry that makes them resolvable at parse time.
//!
//! A registry is built mutable, then frozen with [ExtensionRegistry::as_read_only] before it is
//! handed to parsers.  Frozen registries are plain immutable data and need no locking to share.

use std::collections::BTreeMap;
use std::sync::Arc;

use indicio::{clue, ERROR, INFO};

use super::{Cardinality, Error, FieldDescriptor, FieldType, MessageDescriptor, COLLECTOR};

/////////////////////////////////////// ExtensionDescriptor ////////////////////////////////////////

/// ExtensionDescriptor is a field declared outside the message type it extends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtensionDescriptor {
    extendee: String,
    field: FieldDescriptor,
}

impl ExtensionDescriptor {
    /// Declare `field` as an extension of `extendee`.  The number must fall in one of the
    /// extendee's extension ranges.  Extensions of a message set must be optional messages.
    pub fn new(
        extendee: &MessageDescriptor,
        field: FieldDescriptor,
    ) -> Result<Arc<Self>, Error> {
        if !extendee.is_extension_number(field.number().get()) {
            return Err(Error::InvalidDescriptor {
                name: field.name().to_string(),
                what: "extension number outside the extendee's extension ranges",
            });
        }
        if extendee.message_set_wire_format()
            && (field.field_type() != FieldType::Message
                || field.cardinality() != Cardinality::Optional)
        {
            return Err(Error::InvalidDescriptor {
                name: field.name().to_string(),
                what: "message set extensions must be optional messages",
            });
        }
        Ok(Arc::new(Self {
            extendee: extendee.full_name().to_string(),
            field,
        }))
    }

    /// Full name of the extended message type.
    pub fn extendee(&self) -> &str {
        &self.extendee
    }

    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    pub fn number(&self) -> u32 {
        self.field.number().get()
    }
}

///////////////////////////////////////// ExtensionRegistry ////////////////////////////////////////

static EMPTY: ExtensionRegistry = ExtensionRegistry {
    by_extendee: BTreeMap::new(),
    frozen: true,
};

/// ExtensionRegistry maps (extendee, field number) to an [ExtensionDescriptor].
#[derive(Clone, Debug, Default)]
pub struct ExtensionRegistry {
    by_extendee: BTreeMap<String, BTreeMap<u32, Arc<ExtensionDescriptor>>>,
    frozen: bool,
}

impl ExtensionRegistry {
    /// A new, empty, mutable registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared registry with nothing in it.
    pub fn empty() -> &'static ExtensionRegistry {
        &EMPTY
    }

    /// Register `extension`.  Registering an identical descriptor twice is not an error.
    pub fn add(&mut self, extension: Arc<ExtensionDescriptor>) -> Result<(), Error> {
        let number = extension.number();
        if self.frozen {
            let extendee = extension.extendee();
            clue!(COLLECTOR, ERROR, {
                registry_frozen: extendee,
                field_number: number as u64,
            });
            return Err(Error::RegistryFrozen {
                extendee: extension.extendee.clone(),
                field_number: number,
            }
            .record());
        }
        let by_number = self
            .by_extendee
            .entry(extension.extendee.clone())
            .or_default();
        if let Some(existing) = by_number.get(&number) {
            if **existing == *extension {
                return Ok(());
            }
            let extendee = extension.extendee();
            clue!(COLLECTOR, ERROR, {
                duplicate_extension: extendee,
                field_number: number as u64,
            });
            return Err(Error::DuplicateExtension {
                extendee: extension.extendee.clone(),
                field_number: number,
            }
            .record());
        }
        clue!(COLLECTOR, INFO, {
            register_extension: extension.field.name(),
            field_number: number as u64,
        });
        by_number.insert(number, extension);
        Ok(())
    }

    /// Freeze the registry.  Every later `add` fails with [Error::RegistryFrozen].
    pub fn as_read_only(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.frozen
    }

    /// The extension of `extendee` at `field_number`, if registered.
    pub fn lookup(&self, extendee: &str, field_number: u32) -> Option<&Arc<ExtensionDescriptor>> {
        self.by_extendee.get(extendee)?.get(&field_number)
    }

    /// All extensions of `extendee`, ascending by number.
    pub fn extensions_of<'a>(
        &'a self,
        extendee: &str,
    ) -> impl Iterator<Item = &'a Arc<ExtensionDescriptor>> + 'a {
        self.by_extendee
            .get(extendee)
            .into_iter()
            .flat_map(|by_number| by_number.values())
    }

    /// The number of registered extensions across all extendees.
    pub fn len(&self) -> usize {
        self.by_extendee.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn extendee() -> Arc<MessageDescriptor> {
        MessageDescriptor::builder("test.Extendee")
            .extension_range(100, 200)
            .build()
            .unwrap()
    }

    fn ext(number: u32, field_type: FieldType) -> Arc<ExtensionDescriptor> {
        let field =
            FieldDescriptor::new(number, "ext", field_type, Cardinality::Optional).unwrap();
        ExtensionDescriptor::new(&extendee(), field).unwrap()
    }

    #[test]
    fn add_and_lookup() {
        let mut registry = ExtensionRegistry::new();
        registry.add(ext(100, FieldType::Int32)).unwrap();
        registry.add(ext(150, FieldType::String)).unwrap();
        let registry = registry.as_read_only();
        assert_eq!(
            FieldType::String,
            registry.lookup("test.Extendee", 150).unwrap().field().field_type()
        );
        assert!(registry.lookup("test.Extendee", 151).is_none());
        assert!(registry.lookup("test.Other", 150).is_none());
        let numbers: Vec<u32> = registry
            .extensions_of("test.Extendee")
            .map(|e| e.number())
            .collect();
        assert_eq!(vec![100, 150], numbers);
        assert_eq!(2, registry.len());
    }

    #[test]
    fn identical_twice_is_fine() {
        let mut registry = ExtensionRegistry::new();
        registry.add(ext(100, FieldType::Int32)).unwrap();
        registry.add(ext(100, FieldType::Int32)).unwrap();
        assert_eq!(1, registry.len());
    }

    #[test]
    fn duplicate_extension() {
        let mut registry = ExtensionRegistry::new();
        registry.add(ext(100, FieldType::Int32)).unwrap();
        assert_eq!(
            Err(Error::DuplicateExtension {
                extendee: "test.Extendee".to_string(),
                field_number: 100,
            }),
            registry.add(ext(100, FieldType::Int64))
        );
    }

    #[test]
    fn frozen_registry() {
        let mut registry = ExtensionRegistry::new().as_read_only();
        assert!(registry.is_read_only());
        assert_eq!(
            Err(Error::RegistryFrozen {
                extendee: "test.Extendee".to_string(),
                field_number: 100,
            }),
            registry.add(ext(100, FieldType::Int32))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_registry_is_frozen() {
        assert!(ExtensionRegistry::empty().is_read_only());
        assert!(ExtensionRegistry::empty().is_empty());
    }

    #[test]
    fn outside_extension_range() {
        let field =
            FieldDescriptor::new(99, "ext", FieldType::Int32, Cardinality::Optional).unwrap();
        assert!(matches!(
            ExtensionDescriptor::new(&extendee(), field),
            Err(Error::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn message_set_extensions_are_messages() {
        let set = MessageDescriptor::builder("test.Set")
            .message_set_wire_format()
            .extension_range(4, 1000)
            .build()
            .unwrap();
        let field =
            FieldDescriptor::new(10, "ext", FieldType::Int32, Cardinality::Optional).unwrap();
        assert!(ExtensionDescriptor::new(&set, field).is_err());
        let payload = MessageDescriptor::builder("test.Payload").build().unwrap();
        let field =
            FieldDescriptor::new_message(10, "ext", Cardinality::Optional, &payload).unwrap();
        assert!(ExtensionDescriptor::new(&set, field).is_ok());
    }

    #[test]
    fn registry_is_shareable() {
        fn assert_sync<T: Send + Sync>(_: &T) {}
        let registry = ExtensionRegistry::new().as_read_only();
        assert_sync(&registry);
    }
}
