use std::collections::BTreeMap;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{FirestoreValue, ValueKind};

/// Named wire fields; entry order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    fields: BTreeMap<String, FirestoreValue>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, FirestoreValue> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FirestoreValue> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FirestoreValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FirestoreValue) -> Option<FirestoreValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<FirestoreValue> {
        self.fields.remove(key)
    }

    pub fn get_path(&self, path: &FieldPath) -> Option<&FirestoreValue> {
        value_for_segments(self, path.segments())
    }

    pub fn set_path(&mut self, path: &FieldPath, value: FirestoreValue) {
        set_value_at_segments(&mut self.fields, path.segments(), value);
    }

    pub fn remove_path(&mut self, path: &FieldPath) -> Option<FirestoreValue> {
        remove_at_segments(&mut self.fields, path.segments())
    }

    /// Keeps only the listed field paths.
    pub fn project(&self, paths: &[FieldPath]) -> MapValue {
        let mut projected = MapValue::default();
        for path in paths {
            if let Some(value) = self.get_path(path) {
                projected.set_path(path, value.clone());
            }
        }
        projected
    }

    /// Removes every element equal to one of `values` from the array at `path`.
    ///
    /// A field left without elements is removed from the map altogether, so it reads back as
    /// absent rather than as an empty array. Returns whether the map changed.
    pub fn remove_array_elements(
        &mut self,
        path: &FieldPath,
        values: &[FirestoreValue],
    ) -> FirestoreResult<bool> {
        let current = match self.get_path(path) {
            Some(value) => value,
            None => return Ok(false),
        };
        let array = match current.kind() {
            ValueKind::Array(array) => array,
            _ => {
                return Err(invalid_argument(format!(
                    "Field '{path}' holds a {} value, not an array",
                    current.kind_name()
                )))
            }
        };

        let remaining: Vec<FirestoreValue> = array
            .values()
            .iter()
            .filter(|element| !values.iter().any(|needle| needle.same_as(element)))
            .cloned()
            .collect();
        if remaining.len() == array.len() {
            return Ok(false);
        }

        if remaining.is_empty() {
            self.remove_path(path);
        } else {
            self.set_path(path, FirestoreValue::from_array(remaining));
        }
        Ok(true)
    }
}

impl From<BTreeMap<String, FirestoreValue>> for MapValue {
    fn from(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self::new(fields)
    }
}

fn value_for_segments<'a>(map: &'a MapValue, segments: &[String]) -> Option<&'a FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    let value = map.fields.get(first)?;
    if rest.is_empty() {
        Some(value)
    } else if let ValueKind::Map(child) = value.kind() {
        value_for_segments(child, rest)
    } else {
        None
    }
}

fn set_value_at_segments(
    fields: &mut BTreeMap<String, FirestoreValue>,
    segments: &[String],
    value: FirestoreValue,
) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| FirestoreValue::from_map(BTreeMap::new()));

    let mut child_fields = match entry.kind() {
        ValueKind::Map(map) => map.fields().clone(),
        _ => BTreeMap::new(),
    };

    set_value_at_segments(&mut child_fields, rest, value);
    *entry = FirestoreValue::from_map(child_fields);
}

fn remove_at_segments(
    fields: &mut BTreeMap<String, FirestoreValue>,
    segments: &[String],
) -> Option<FirestoreValue> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return fields.remove(first);
    }

    let entry = fields.get_mut(first)?;
    let mut child_fields = match entry.kind() {
        ValueKind::Map(map) => map.fields().clone(),
        _ => return None,
    };
    let removed = remove_at_segments(&mut child_fields, rest);
    *entry = FirestoreValue::from_map(child_fields);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(value: &str) -> FieldPath {
        FieldPath::from_dot_separated(value).unwrap()
    }

    #[test]
    fn nested_paths() {
        let mut map = MapValue::default();
        map.set_path(&path("stats.population"), FirestoreValue::from_integer(10));
        assert_eq!(
            map.get_path(&path("stats.population")),
            Some(&FirestoreValue::from_integer(10))
        );
        assert!(map.get_path(&path("stats.area")).is_none());
        assert_eq!(
            map.remove_path(&path("stats.population")),
            Some(FirestoreValue::from_integer(10))
        );
        assert!(map.contains_key("stats"));
    }

    #[test]
    fn projection_keeps_requested_fields() {
        let mut map = MapValue::default();
        map.insert("a", FirestoreValue::from_integer(1));
        map.insert("b", FirestoreValue::from_integer(2));
        let projected = map.project(&[path("b"), path("missing")]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("b"), Some(&FirestoreValue::from_integer(2)));
    }

    #[test]
    fn removing_last_elements_drops_field() {
        let mut map = MapValue::default();
        map.insert(
            "tags",
            FirestoreValue::from_array(vec![
                FirestoreValue::from_string("a"),
                FirestoreValue::from_string("b"),
            ]),
        );

        let changed = map
            .remove_array_elements(&path("tags"), &[FirestoreValue::from_string("a")])
            .unwrap();
        assert!(changed);
        assert_eq!(
            map.get("tags"),
            Some(&FirestoreValue::from_array(vec![FirestoreValue::from_string("b")]))
        );

        map.remove_array_elements(&path("tags"), &[FirestoreValue::from_string("b")])
            .unwrap();
        assert!(!map.contains_key("tags"));
    }

    #[test]
    fn removing_from_non_array_fails() {
        let mut map = MapValue::default();
        map.insert("name", FirestoreValue::from_string("x"));
        let err = map
            .remove_array_elements(&path("name"), &[FirestoreValue::null()])
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
