use std::collections::HashMap;
use std::sync::Arc;

use crate::firestore::api::Document;
use crate::firestore::codec::{Codec, Record};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::Timestamp;

struct CacheEntry<T> {
    update_time: Timestamp,
    value: Arc<T>,
}

/// Decoded documents keyed by resource name.
///
/// A document whose `update_time` matches the cached entry is not decoded again; the cached
/// `Arc` is handed back instead. Documents without an `update_time` are always decoded and never
/// cached.
pub struct DocumentCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
}

impl<T: Record> DocumentCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get_or_decode(&mut self, codec: &Codec, document: &Document) -> FirestoreResult<Arc<T>> {
        let name = document.name();
        let Some(update_time) = document.update_time() else {
            self.entries.remove(&name);
            return codec.decode_document(document).map(Arc::new);
        };

        if let Some(entry) = self.entries.get(&name) {
            if entry.update_time == update_time {
                return Ok(Arc::clone(&entry.value));
            }
        }

        let value = Arc::new(codec.decode_document::<T>(document)?);
        self.entries.insert(
            name,
            CacheEntry {
                update_time,
                value: Arc::clone(&value),
            },
        );
        Ok(value)
    }

    /// The cached value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).map(|entry| Arc::clone(&entry.value))
    }

    pub fn invalidate(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Record> Default for DocumentCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
