use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::FirestoreValue;

use super::codec::Codec;
use super::field_codec::FieldCodec;
use super::naming::NamingPolicy;

/// How a member was declared on the owning type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberOrigin {
    Property,
    /// Storage behind a property: `_name`, `m_name` or `<Name>k__BackingField`.
    BackingField,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MemberAttribute {
    /// Included unless the type only serializes explicitly marked members.
    #[default]
    Default,
    /// Always included, optionally under a fixed wire name.
    Include { wire_name: Option<String> },
    Ignore,
}

/// What to do when two members resolve to the same wire name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WireNameCollision {
    #[default]
    Reject,
    /// Keep the first declared member; later ones are excluded.
    FirstWins,
}

/// Outcome of resolving one declared member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub owner_type: &'static str,
    pub member: String,
    pub wire_name: String,
    pub origin: MemberOrigin,
    pub is_included: bool,
}

/// Reads and writes one member of `T` through the codec.
pub trait MemberAccess<T>: Send + Sync {
    fn encode(&self, target: &T, codec: &Codec) -> FirestoreResult<FirestoreValue>;

    /// Checks that `value` converts into the member's type without touching any target.
    fn validate(&self, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<()>;

    /// Patches the member in place and reports whether its wire value changed.
    fn apply(&self, target: &mut T, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<bool>;
}

/// Member access through a pair of plain field projections.
pub struct FieldAccess<T, V> {
    get: fn(&T) -> &V,
    get_mut: fn(&mut T) -> &mut V,
}

impl<T, V> MemberAccess<T> for FieldAccess<T, V>
where
    V: FieldCodec,
{
    fn encode(&self, target: &T, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        codec.encode((self.get)(target))
    }

    fn validate(&self, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<()> {
        codec.decode::<V>(value).map(|_| ())
    }

    fn apply(&self, target: &mut T, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<bool> {
        codec.apply((self.get_mut)(target), value)
    }
}

pub struct MemberDeclaration<T> {
    name: &'static str,
    origin: MemberOrigin,
    attribute: MemberAttribute,
    writable: bool,
    internal: bool,
    access: Arc<dyn MemberAccess<T>>,
}

/// Declared shape of a record type, built once per type by [`super::Record::schema`].
///
/// Modifiers such as [`RecordSchema::rename`] or [`RecordSchema::ignore`] apply to the most
/// recently declared member.
///
/// ```
/// use firestore_docs_engine::firestore::codec::{Record, RecordSchema};
///
/// #[derive(Default)]
/// struct City {
///     name: String,
///     population: i64,
///     cache_hits: u32,
/// }
///
/// impl Record for City {
///     fn schema() -> RecordSchema<Self> {
///         RecordSchema::new()
///             .property("name", |c: &City| &c.name, |c: &mut City| &mut c.name)
///             .property("population", |c: &City| &c.population, |c: &mut City| &mut c.population)
///             .rename("pop")
///             .property("cache_hits", |c: &City| &c.cache_hits, |c: &mut City| &mut c.cache_hits)
///             .ignore()
///     }
/// }
/// # firestore_docs_engine::impl_record_codec!(City);
/// ```
pub struct RecordSchema<T> {
    type_name: &'static str,
    explicit_only: bool,
    members: Vec<MemberDeclaration<T>>,
}

impl<T: 'static> RecordSchema<T> {
    pub fn new() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            explicit_only: false,
            members: Vec::new(),
        }
    }

    /// Only members marked with [`RecordSchema::include`] or [`RecordSchema::rename`] are
    /// serialized.
    pub fn explicit_only(mut self) -> Self {
        self.explicit_only = true;
        self
    }

    pub fn property<V: FieldCodec>(
        self,
        name: &'static str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> Self {
        self.member(name, MemberOrigin::Property, Arc::new(FieldAccess { get, get_mut }))
    }

    pub fn backing_field<V: FieldCodec>(
        self,
        name: &'static str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> Self {
        self.member(
            name,
            MemberOrigin::BackingField,
            Arc::new(FieldAccess { get, get_mut }),
        )
    }

    /// Declares a member with a hand written accessor.
    pub fn member(
        mut self,
        name: &'static str,
        origin: MemberOrigin,
        access: Arc<dyn MemberAccess<T>>,
    ) -> Self {
        self.members.push(MemberDeclaration {
            name,
            origin,
            attribute: MemberAttribute::Default,
            writable: true,
            internal: false,
            access,
        });
        self
    }

    pub fn include(self) -> Self {
        self.modify_last(|member| member.attribute = MemberAttribute::Include { wire_name: None })
    }

    pub fn rename(self, wire_name: impl Into<String>) -> Self {
        let wire_name = wire_name.into();
        self.modify_last(move |member| {
            member.attribute = MemberAttribute::Include {
                wire_name: Some(wire_name),
            }
        })
    }

    pub fn ignore(self) -> Self {
        self.modify_last(|member| member.attribute = MemberAttribute::Ignore)
    }

    pub fn read_only(self) -> Self {
        self.modify_last(|member| member.writable = false)
    }

    /// Marks bookkeeping state that never goes over the wire, whatever its attributes.
    pub fn internal(self) -> Self {
        self.modify_last(|member| member.internal = true)
    }

    fn modify_last(mut self, apply: impl FnOnce(&mut MemberDeclaration<T>)) -> Self {
        if let Some(member) = self.members.last_mut() {
            apply(member);
        }
        self
    }
}

impl<T: 'static> Default for RecordSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ResolvedField<T> {
    pub(crate) descriptor: FieldDescriptor,
    pub(crate) access: Arc<dyn MemberAccess<T>>,
}

/// Wire mapping of a record type under one naming policy.
pub struct ResolvedSchema<T> {
    type_name: &'static str,
    fields: Vec<ResolvedField<T>>,
    by_wire_name: HashMap<String, usize>,
}

impl<T> ResolvedSchema<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Every declared member that survived backing-field matching, included or not.
    pub fn descriptors(&self) -> Vec<FieldDescriptor> {
        self.fields
            .iter()
            .map(|field| field.descriptor.clone())
            .collect()
    }

    pub(crate) fn included(&self) -> impl Iterator<Item = &ResolvedField<T>> {
        self.fields.iter().filter(|field| field.descriptor.is_included)
    }

    pub(crate) fn field_for_wire_name(&self, wire_name: &str) -> Option<&ResolvedField<T>> {
        self.by_wire_name
            .get(wire_name)
            .and_then(|index| self.fields.get(*index))
    }
}

/// Resolves declared members into wire fields.
///
/// Properties are resolved before backing fields. A backing field whose name matches a declared
/// property (ignoring case and underscores) is the storage of that property and is dropped.
pub fn resolve<T>(
    schema: RecordSchema<T>,
    naming: &NamingPolicy,
    collision: WireNameCollision,
) -> FirestoreResult<ResolvedSchema<T>> {
    let RecordSchema {
        type_name,
        explicit_only,
        members,
    } = schema;

    let property_keys: HashSet<String> = members
        .iter()
        .filter(|member| member.origin == MemberOrigin::Property)
        .map(|member| normalized(member.name))
        .collect();

    let (properties, backing_fields): (Vec<_>, Vec<_>) = members
        .into_iter()
        .partition(|member| member.origin == MemberOrigin::Property);

    let mut resolved = ResolvedSchema {
        type_name,
        fields: Vec::new(),
        by_wire_name: HashMap::new(),
    };

    for member in properties {
        let base_name = member.name.to_string();
        claim(&mut resolved, member, base_name, explicit_only, naming, collision)?;
    }

    for member in backing_fields {
        let base_name = backing_field_base(member.name);
        if property_keys.contains(&normalized(&base_name)) {
            continue;
        }
        claim(&mut resolved, member, base_name, explicit_only, naming, collision)?;
    }

    Ok(resolved)
}

fn claim<T>(
    resolved: &mut ResolvedSchema<T>,
    member: MemberDeclaration<T>,
    base_name: String,
    explicit_only: bool,
    naming: &NamingPolicy,
    collision: WireNameCollision,
) -> FirestoreResult<()> {
    let explicitly_included = matches!(member.attribute, MemberAttribute::Include { .. });
    let mut is_included = member.writable
        && !member.internal
        && (explicitly_included
            || (!explicit_only && member.attribute != MemberAttribute::Ignore));

    let wire_name = match &member.attribute {
        MemberAttribute::Include {
            wire_name: Some(name),
        } => name.clone(),
        _ => naming.apply(&base_name),
    };

    if is_included {
        if let Some(existing) = resolved.by_wire_name.get(&wire_name) {
            match collision {
                WireNameCollision::Reject => {
                    let other = &resolved.fields[*existing].descriptor.member;
                    return Err(invalid_argument(format!(
                        "Members '{other}' and '{}' of {} both map to wire name '{wire_name}'",
                        member.name, resolved.type_name
                    )));
                }
                WireNameCollision::FirstWins => is_included = false,
            }
        }
    }

    let index = resolved.fields.len();
    if is_included {
        resolved.by_wire_name.insert(wire_name.clone(), index);
    }
    resolved.fields.push(ResolvedField {
        descriptor: FieldDescriptor {
            owner_type: resolved.type_name,
            member: member.name.to_string(),
            wire_name,
            origin: member.origin,
            is_included,
        },
        access: member.access,
    });
    Ok(())
}

fn backing_field_base(name: &str) -> String {
    if let Some(inner) = name
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix(">k__BackingField"))
    {
        return inner.to_string();
    }
    if let Some(rest) = name.strip_prefix("m_") {
        return rest.to_string();
    }
    name.trim_start_matches('_').to_string()
}

fn normalized(name: &str) -> String {
    name.chars()
        .filter(|ch| *ch != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample {
        name: String,
        backing_name: String,
        count: i64,
        secret: String,
    }

    fn names(schema: &ResolvedSchema<Sample>) -> Vec<(String, String, bool)> {
        schema
            .descriptors()
            .into_iter()
            .map(|d| (d.member, d.wire_name, d.is_included))
            .collect()
    }

    #[test]
    fn backing_fields_matching_properties_are_dropped() {
        let schema = RecordSchema::<Sample>::new()
            .property("Name", |s: &Sample| &s.name, |s: &mut Sample| &mut s.name)
            .backing_field(
                "<Name>k__BackingField",
                |s: &Sample| &s.backing_name,
                |s: &mut Sample| &mut s.backing_name,
            )
            .backing_field("m_count", |s: &Sample| &s.count, |s: &mut Sample| &mut s.count);

        let resolved = resolve(schema, &NamingPolicy::CamelCase, WireNameCollision::Reject).unwrap();
        assert_eq!(
            names(&resolved),
            vec![
                ("Name".to_string(), "name".to_string(), true),
                ("m_count".to_string(), "count".to_string(), true),
            ]
        );
        assert!(resolved.field_for_wire_name("count").is_some());
    }

    #[test]
    fn attributes_control_inclusion() {
        let schema = RecordSchema::<Sample>::new()
            .explicit_only()
            .property("name", |s: &Sample| &s.name, |s: &mut Sample| &mut s.name)
            .rename("display")
            .property("count", |s: &Sample| &s.count, |s: &mut Sample| &mut s.count)
            .property("secret", |s: &Sample| &s.secret, |s: &mut Sample| &mut s.secret)
            .include()
            .internal();

        let resolved = resolve(schema, &NamingPolicy::CamelCase, WireNameCollision::Reject).unwrap();
        assert_eq!(
            names(&resolved),
            vec![
                ("name".to_string(), "display".to_string(), true),
                ("count".to_string(), "count".to_string(), false),
                ("secret".to_string(), "secret".to_string(), false),
            ]
        );
    }

    #[test]
    fn collisions_follow_policy() {
        let build = || {
            RecordSchema::<Sample>::new()
                .property("name", |s: &Sample| &s.name, |s: &mut Sample| &mut s.name)
                .property("secret", |s: &Sample| &s.secret, |s: &mut Sample| &mut s.secret)
                .rename("name")
        };

        let err = resolve(build(), &NamingPolicy::CamelCase, WireNameCollision::Reject)
            .err()
            .unwrap();
        assert_eq!(err.code_str(), "firestore/invalid-argument");

        let resolved = resolve(build(), &NamingPolicy::CamelCase, WireNameCollision::FirstWins).unwrap();
        assert_eq!(
            names(&resolved),
            vec![
                ("name".to_string(), "name".to_string(), true),
                ("secret".to_string(), "name".to_string(), false),
            ]
        );
    }

    #[test]
    fn read_only_members_are_excluded() {
        let schema = RecordSchema::<Sample>::new()
            .property("count", |s: &Sample| &s.count, |s: &mut Sample| &mut s.count)
            .read_only();
        let resolved = resolve(schema, &NamingPolicy::SnakeCase, WireNameCollision::Reject).unwrap();
        assert!(!resolved.descriptors()[0].is_included);
    }
}
