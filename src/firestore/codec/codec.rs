use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

use crate::firestore::api::Document;
use crate::firestore::error::{conversion_failed, FirestoreError, FirestoreResult};
use crate::firestore::logger::CODEC_LOGGER;
use crate::firestore::value::{FirestoreValue, MapValue};

use super::converter::{ConverterRegistry, ValueConverter};
use super::field_codec::{mismatch, FieldCodec};
use super::naming::NamingPolicy;
use super::record::Record;
use super::schema::{resolve, FieldDescriptor, ResolvedSchema, WireNameCollision};

#[derive(Clone, Debug, Default)]
pub struct CodecOptions {
    pub naming_policy: NamingPolicy,
    pub collision: WireNameCollision,
}

type SchemaKey = (TypeId, &'static str, WireNameCollision);

/// Converts application values to and from wire values.
///
/// A `Codec` carries its naming policy, custom converters and the resolved record schemas, so
/// one instance can be shared behind an `Arc` by every reader and writer that should agree on
/// the mapping.
pub struct Codec {
    options: CodecOptions,
    converters: ConverterRegistry,
    schemas: RwLock<HashMap<SchemaKey, Arc<dyn Any + Send + Sync>>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::with_options(CodecOptions::default())
    }

    pub fn with_options(options: CodecOptions) -> Self {
        Self {
            options,
            converters: ConverterRegistry::default(),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a converter that takes precedence over the built-in rules for `T`.
    pub fn with_converter<T, C>(mut self, converter: C) -> Self
    where
        T: 'static,
        C: ValueConverter<T> + 'static,
    {
        self.converters.insert::<T>(Arc::new(converter));
        self
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn encode<T: FieldCodec>(&self, value: &T) -> FirestoreResult<FirestoreValue> {
        match self.converters.get::<T>() {
            Some(converter) => converter.to_value(value),
            None => value.encode_value(self),
        }
    }

    /// Builds a fresh `T` from `value`.
    pub fn decode<T: FieldCodec>(&self, value: &FirestoreValue) -> FirestoreResult<T> {
        if let Some(converter) = self.converters.get::<T>() {
            return converter.from_value(value);
        }
        if value.is_null() {
            return T::from_null();
        }
        T::decode_value(value, self)
    }

    /// Patches `target` in place and reports whether its wire representation changed.
    pub fn apply<T: FieldCodec>(&self, target: &mut T, value: &FirestoreValue) -> FirestoreResult<bool> {
        if let Some(converter) = self.converters.get::<T>() {
            let next = converter.from_value(value)?;
            if converter.to_value(&next)?.same_as(&converter.to_value(target)?) {
                return Ok(false);
            }
            *target = next;
            return Ok(true);
        }
        if value.is_null() {
            let reset = T::from_null()?;
            if reset.encode_value(self)?.same_as(&target.encode_value(self)?) {
                return Ok(false);
            }
            *target = reset;
            return Ok(true);
        }
        target.patch_value(value, self)
    }

    /// Wire fields of a record, keyed by wire name.
    pub fn encode_fields<T: Record>(&self, value: &T) -> FirestoreResult<MapValue> {
        let schema = self.schema::<T>()?;
        let mut fields = BTreeMap::new();
        for field in schema.included() {
            let encoded = field
                .access
                .encode(value, self)
                .map_err(|err| in_member(err, schema.type_name(), &field.descriptor.member))?;
            fields.insert(field.descriptor.wire_name.clone(), encoded);
        }
        Ok(MapValue::new(fields))
    }

    pub fn decode_fields<T: Record>(&self, fields: &MapValue) -> FirestoreResult<T> {
        let mut target = T::default();
        self.patch_fields(&mut target, fields, false)?;
        Ok(target)
    }

    /// Patches the members present in `fields`; members without a wire entry keep their value.
    pub fn apply_fields<T: Record>(&self, target: &mut T, fields: &MapValue) -> FirestoreResult<bool> {
        self.patch_fields(target, fields, true)
    }

    pub fn decode_document<T: Record>(&self, document: &Document) -> FirestoreResult<T> {
        self.decode_fields(document.fields())
    }

    pub fn apply_document<T: Record>(&self, target: &mut T, document: &Document) -> FirestoreResult<bool> {
        self.apply_fields(target, document.fields())
    }

    #[doc(hidden)]
    pub fn encode_record<T: Record>(&self, value: &T) -> FirestoreResult<FirestoreValue> {
        self.encode_fields(value).map(FirestoreValue::from_map_value)
    }

    #[doc(hidden)]
    pub fn decode_record<T: Record>(&self, value: &FirestoreValue) -> FirestoreResult<T> {
        let fields = value.as_map().ok_or_else(|| mismatch::<T>(value))?;
        self.decode_fields(fields)
    }

    #[doc(hidden)]
    pub fn apply_record<T: Record>(&self, target: &mut T, value: &FirestoreValue) -> FirestoreResult<bool> {
        let fields = value.as_map().ok_or_else(|| mismatch::<T>(value))?;
        self.apply_fields(target, fields)
    }

    /// Resolves `T`'s schema now, so wire-name collisions and other declaration errors surface
    /// at setup rather than on the first encode or decode.
    pub fn register<T: Record>(&self) -> FirestoreResult<&Self> {
        self.schema::<T>()?;
        Ok(self)
    }

    /// Resolved field descriptors of `T` under this codec's options.
    pub fn describe<T: Record>(&self) -> FirestoreResult<Vec<FieldDescriptor>> {
        Ok(self.schema::<T>()?.descriptors())
    }

    pub(crate) fn schema<T: Record>(&self) -> FirestoreResult<Arc<ResolvedSchema<T>>> {
        let key: SchemaKey = (
            TypeId::of::<T>(),
            self.options.naming_policy.cache_key(),
            self.options.collision,
        );

        let cached = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(entry) = cached.and_then(|entry| entry.downcast::<ResolvedSchema<T>>().ok()) {
            return Ok(entry);
        }

        let resolved = Arc::new(resolve(
            T::schema(),
            &self.options.naming_policy,
            self.options.collision,
        )?);
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        Ok(resolved)
    }

    // Every matched member is converted before any is written, so a failing field leaves the
    // target and its change log untouched.
    fn patch_fields<T: Record>(&self, target: &mut T, fields: &MapValue, notify: bool) -> FirestoreResult<bool> {
        let schema = self.schema::<T>()?;

        let mut matched = Vec::with_capacity(fields.len());
        for (wire_name, value) in fields.fields() {
            let Some(field) = schema.field_for_wire_name(wire_name) else {
                CODEC_LOGGER.debug(format!(
                    "Skipping wire field '{wire_name}' with no member on {}",
                    schema.type_name()
                ));
                continue;
            };
            field
                .access
                .validate(value, self)
                .map_err(|err| in_member(err, schema.type_name(), &field.descriptor.member))?;
            matched.push((field, value));
        }

        let mut changed = false;
        for (field, value) in matched {
            let member_changed = field
                .access
                .apply(target, value, self)
                .map_err(|err| in_member(err, schema.type_name(), &field.descriptor.member))?;
            if member_changed {
                changed = true;
                if notify {
                    target.property_changed(&field.descriptor.member);
                }
            }
        }

        Ok(changed)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("options", &self.options)
            .field("converters", &self.converters.len())
            .finish()
    }
}

fn in_member(err: FirestoreError, owner: &str, member: &str) -> FirestoreError {
    FirestoreError::new(err.code.clone(), format!("{owner}.{member}: {}", err.message()))
}

/// Error raised by types whose conversion relies on a registered converter.
pub fn missing_converter<T>() -> FirestoreError {
    conversion_failed(format!("No converter registered for {}", type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::codec::{FnConverter, RecordSchema};
    use crate::firestore::model::Timestamp;
    use crate::firestore::value::ValueKind;

    #[derive(Default, Debug, PartialEq)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    impl Record for Address {
        fn schema() -> RecordSchema<Self> {
            RecordSchema::new()
                .property("city", |a: &Address| &a.city, |a: &mut Address| &mut a.city)
                .property("zip", |a: &Address| &a.zip, |a: &mut Address| &mut a.zip)
        }
    }

    #[derive(Default, Debug, PartialEq)]
    struct Person {
        first_name: String,
        age: u32,
        address: Address,
        tags: Vec<String>,
        changes: Vec<String>,
    }

    impl Record for Person {
        fn schema() -> RecordSchema<Self> {
            RecordSchema::new()
                .property("first_name", |p: &Person| &p.first_name, |p: &mut Person| &mut p.first_name)
                .property("age", |p: &Person| &p.age, |p: &mut Person| &mut p.age)
                .property("address", |p: &Person| &p.address, |p: &mut Person| &mut p.address)
                .property("tags", |p: &Person| &p.tags, |p: &mut Person| &mut p.tags)
                .property("changes", |p: &Person| &p.changes, |p: &mut Person| &mut p.changes)
                .internal()
        }

        fn property_changed(&mut self, member: &str) {
            self.changes.push(member.to_string());
        }
    }

    crate::impl_record_codec!(Address, Person);

    fn sample() -> Person {
        Person {
            first_name: "Ada".into(),
            age: 36,
            address: Address {
                city: "London".into(),
                zip: None,
            },
            tags: vec!["math".into()],
            changes: Vec::new(),
        }
    }

    #[test]
    fn records_encode_under_naming_policy() {
        let codec = Codec::new();
        let fields = codec.encode_fields(&sample()).unwrap();
        let keys: Vec<_> = fields.fields().keys().cloned().collect();
        assert_eq!(keys, ["address", "age", "firstName", "tags"]);
        let address = fields.get("address").and_then(FirestoreValue::as_map).unwrap();
        assert_eq!(address.get("zip"), Some(&FirestoreValue::null()));

        let snake = Codec::with_options(CodecOptions {
            naming_policy: NamingPolicy::SnakeCase,
            ..CodecOptions::default()
        });
        assert!(snake.encode_fields(&sample()).unwrap().contains_key("first_name"));
    }

    #[test]
    fn decode_round_trips_records() {
        let codec = Codec::new();
        let fields = codec.encode_fields(&sample()).unwrap();
        let decoded: Person = codec.decode_fields(&fields).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn apply_notifies_each_changed_member_once() {
        let codec = Codec::new();
        let mut person = sample();
        let mut update = codec.encode_fields(&sample()).unwrap();
        update.insert("age", FirestoreValue::from_integer(37));
        update.insert("unknown", FirestoreValue::from_bool(true));

        assert!(codec.apply_fields(&mut person, &update).unwrap());
        assert_eq!(person.age, 37);
        assert_eq!(person.changes, ["age"]);

        person.changes.clear();
        assert!(!codec.apply_fields(&mut person, &update).unwrap());
        assert!(person.changes.is_empty());
    }

    #[test]
    fn converters_take_precedence() {
        let codec = Codec::new().with_converter::<Timestamp, _>(FnConverter::new(
            |ts: &Timestamp| -> FirestoreResult<FirestoreValue> {
                Ok(FirestoreValue::from_integer(ts.seconds))
            },
            |value: &FirestoreValue| -> FirestoreResult<Timestamp> {
                match value.kind() {
                    ValueKind::Integer(seconds) => Ok(Timestamp::new(*seconds, 0)),
                    _ => Err(conversion_failed("expected epoch seconds")),
                }
            },
        ));

        let values = vec![Timestamp::new(10, 0), Timestamp::new(20, 0)];
        let encoded = codec.encode(&values).unwrap();
        assert_eq!(
            encoded,
            FirestoreValue::from_array(vec![
                FirestoreValue::from_integer(10),
                FirestoreValue::from_integer(20),
            ])
        );
        let decoded: Vec<Timestamp> = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn member_errors_name_the_member() {
        let codec = Codec::new();
        let mut fields = MapValue::default();
        fields.insert("age", FirestoreValue::from_string("old"));
        let err = codec.decode_fields::<Person>(&fields).unwrap_err();
        assert_eq!(err.code_str(), "firestore/conversion-failed");
        assert!(err.message().contains(".age:"));
    }

    #[test]
    fn failed_apply_leaves_target_untouched() {
        let codec = Codec::new();
        let mut person = sample();
        let mut update = MapValue::default();
        update.insert("age", FirestoreValue::from_integer(40));
        update.insert("firstName", FirestoreValue::from_integer(5));

        let err = codec.apply_fields(&mut person, &update).unwrap_err();
        assert_eq!(err.code_str(), "firestore/conversion-failed");
        assert_eq!(person, sample());
        assert!(person.changes.is_empty());
    }

    #[test]
    fn nested_failure_leaves_outer_members_untouched() {
        let codec = Codec::new();
        let mut person = sample();
        let mut address = MapValue::default();
        address.insert("city", FirestoreValue::from_bool(true));
        let mut update = MapValue::default();
        update.insert("age", FirestoreValue::from_integer(40));
        update.insert("address", FirestoreValue::from_map_value(address));

        assert!(codec.apply_fields(&mut person, &update).is_err());
        assert_eq!(person, sample());
    }

    #[derive(Default)]
    struct Clashing {
        name: String,
        alias: String,
    }

    impl Record for Clashing {
        fn schema() -> RecordSchema<Self> {
            RecordSchema::new()
                .property("name", |c: &Clashing| &c.name, |c: &mut Clashing| &mut c.name)
                .property("alias", |c: &Clashing| &c.alias, |c: &mut Clashing| &mut c.alias)
                .rename("name")
        }
    }

    #[test]
    fn register_reports_collisions_up_front() {
        let codec = Codec::new();
        let err = codec.register::<Clashing>().err().unwrap();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(codec.register::<Person>().is_ok());
    }

    #[test]
    fn schemas_are_cached() {
        let codec = Codec::new();
        let first = codec.schema::<Person>().unwrap();
        let second = codec.schema::<Person>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(codec.describe::<Person>().unwrap().len(), 5);
    }
}
