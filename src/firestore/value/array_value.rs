use crate::firestore::value::FirestoreValue;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayValue {
    values: Vec<FirestoreValue>,
}

impl ArrayValue {
    pub fn new(values: Vec<FirestoreValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, needle: &FirestoreValue) -> bool {
        self.values.iter().any(|candidate| candidate.same_as(needle))
    }

    pub fn into_values(self) -> Vec<FirestoreValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_uses_wire_equality() {
        let array = ArrayValue::new(vec![
            FirestoreValue::from_integer(1),
            FirestoreValue::from_double(f64::NAN),
        ]);
        assert_eq!(array.len(), 2);
        assert!(array.contains(&FirestoreValue::from_integer(1)));
        assert!(array.contains(&FirestoreValue::from_double(f64::NAN)));
        assert!(!array.contains(&FirestoreValue::from_string("1")));
    }
}
