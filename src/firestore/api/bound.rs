use crate::firestore::api::{Document, DocumentReference};
use crate::firestore::codec::{Codec, Record};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::Timestamp;

/// A live application value tied to one stored document.
///
/// Later snapshots of the same document are patched into the value in place, so the record's
/// `property_changed` hook fires only for members whose wire value actually moved.
pub struct BoundDocument<T> {
    reference: DocumentReference,
    value: T,
    update_time: Option<Timestamp>,
}

impl<T: Record> BoundDocument<T> {
    pub fn bind(codec: &Codec, document: &Document) -> FirestoreResult<Self> {
        Ok(Self {
            reference: document.reference().clone(),
            value: codec.decode_document(document)?,
            update_time: document.update_time(),
        })
    }

    /// Binds an existing value and applies `document` to it.
    pub fn attach(codec: &Codec, mut value: T, document: &Document) -> FirestoreResult<Self> {
        codec.apply_document(&mut value, document)?;
        Ok(Self {
            reference: document.reference().clone(),
            value,
            update_time: document.update_time(),
        })
    }

    /// Applies a newer snapshot; returns whether any member changed.
    ///
    /// Every snapshot is compared member by member, including one that repeats the last
    /// `update_time`, since a partial or projected read may carry fields not yet seen.
    pub fn refresh(&mut self, codec: &Codec, document: &Document) -> FirestoreResult<bool> {
        if document.reference() != &self.reference {
            return Err(invalid_argument(format!(
                "Cannot refresh '{}' from '{}'",
                self.reference.resource_name(),
                document.name()
            )));
        }
        let changed = codec.apply_document(&mut self.value, document)?;
        self.update_time = document.update_time();
        Ok(changed)
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn update_time(&self) -> Option<Timestamp> {
        self.update_time
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
