use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::firestore::error::FirestoreResult;
use crate::firestore::value::FirestoreValue;

/// Caller supplied conversion for one Rust type.
///
/// A registered converter replaces the built-in rules for its type wherever the type appears,
/// including inside collections and records, and receives `Null` values as well.
pub trait ValueConverter<T>: Send + Sync {
    fn to_value(&self, value: &T) -> FirestoreResult<FirestoreValue>;

    fn from_value(&self, value: &FirestoreValue) -> FirestoreResult<T>;
}

/// Closures pair as a converter.
pub struct FnConverter<E, D> {
    encode: E,
    decode: D,
}

impl<E, D> FnConverter<E, D> {
    pub fn new(encode: E, decode: D) -> Self {
        Self { encode, decode }
    }
}

impl<T, E, D> ValueConverter<T> for FnConverter<E, D>
where
    E: Fn(&T) -> FirestoreResult<FirestoreValue> + Send + Sync,
    D: Fn(&FirestoreValue) -> FirestoreResult<T> + Send + Sync,
{
    fn to_value(&self, value: &T) -> FirestoreResult<FirestoreValue> {
        (self.encode)(value)
    }

    fn from_value(&self, value: &FirestoreValue) -> FirestoreResult<T> {
        (self.decode)(value)
    }
}

/// Converters keyed by the type they handle.
#[derive(Clone, Default)]
pub(crate) struct ConverterRegistry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ConverterRegistry {
    pub(crate) fn insert<T: 'static>(&mut self, converter: Arc<dyn ValueConverter<T>>) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(converter));
    }

    pub(crate) fn get<T: 'static>(&self) -> Option<Arc<dyn ValueConverter<T>>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn ValueConverter<T>>>())
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::conversion_failed;

    #[test]
    fn registry_returns_converter_by_type() {
        let mut registry = ConverterRegistry::default();
        let converter = FnConverter::new(
            |value: &u8| -> FirestoreResult<FirestoreValue> {
                Ok(FirestoreValue::from_string(value.to_string()))
            },
            |value: &FirestoreValue| -> FirestoreResult<u8> {
                value
                    .as_str()
                    .and_then(|text| text.parse::<u8>().ok())
                    .ok_or_else(|| conversion_failed("not a u8 string"))
            },
        );
        registry.insert::<u8>(Arc::new(converter));

        assert_eq!(registry.len(), 1);
        assert!(registry.get::<u16>().is_none());
        let found = registry.get::<u8>().unwrap();
        assert_eq!(found.to_value(&7).unwrap(), FirestoreValue::from_string("7"));
        assert_eq!(found.from_value(&FirestoreValue::from_string("9")).unwrap(), 9);
    }
}
