use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{FieldPath, IntoFieldPath, Timestamp};
use crate::firestore::value::{FirestoreValue, MapValue};

use super::reference::DocumentReference;

/// A stored document as read from (or about to be written to) the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    reference: DocumentReference,
    fields: MapValue,
    create_time: Option<Timestamp>,
    update_time: Option<Timestamp>,
}

impl Document {
    pub fn new(reference: DocumentReference, fields: MapValue) -> Self {
        Self {
            reference,
            fields,
            create_time: None,
            update_time: None,
        }
    }

    pub fn with_times(
        mut self,
        create_time: Option<Timestamp>,
        update_time: Option<Timestamp>,
    ) -> Self {
        self.create_time = create_time;
        self.update_time = update_time;
        self
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    /// Fully qualified resource name.
    pub fn name(&self) -> String {
        self.reference.resource_name()
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn fields(&self) -> &MapValue {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut MapValue {
        &mut self.fields
    }

    pub fn into_fields(self) -> MapValue {
        self.fields
    }

    pub fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }

    pub fn update_time(&self) -> Option<Timestamp> {
        self.update_time
    }

    /// Reads a possibly nested field; `None` when the field is absent.
    pub fn get(&self, path: impl IntoFieldPath) -> FirestoreResult<Option<&FirestoreValue>> {
        let path = path.into_field_path()?;
        Ok(self.fields.get_path(&path))
    }

    /// Value of the given order field, with `__name__` answered by the document reference.
    pub fn order_value(&self, path: &FieldPath) -> Option<FirestoreValue> {
        if path.is_document_id() {
            return Some(FirestoreValue::from_reference(self.name()));
        }
        self.fields.get_path(path).cloned()
    }

    /// Removes matching elements from an array field. A field emptied this way is dropped
    /// from the document, so it later reads back as absent.
    pub fn remove_array_elements(
        &mut self,
        path: impl IntoFieldPath,
        values: &[FirestoreValue],
    ) -> FirestoreResult<bool> {
        let path = path.into_field_path()?;
        self.fields.remove_array_elements(&path, values)
    }
}

/// A document delivered by a query, stamped with the time it was read.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDocument {
    document: Document,
    read_time: Option<Timestamp>,
}

impl QueryDocument {
    pub fn new(document: Document, read_time: Option<Timestamp>) -> Self {
        Self {
            document,
            read_time,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn read_time(&self) -> Option<Timestamp> {
        self.read_time
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}
