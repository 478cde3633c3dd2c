use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DatabaseId, DocumentKey, ResourcePath};

use super::query::Query;

const AUTO_ID_LENGTH: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionReference {
    database_id: DatabaseId,
    path: ResourcePath,
}

impl CollectionReference {
    pub fn new(database_id: DatabaseId, path: ResourcePath) -> FirestoreResult<Self> {
        if path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Collection references must point to a collection (odd number of segments)",
            ));
        }
        Ok(Self { database_id, path })
    }

    /// Parses a slash separated collection path such as `rooms/eros/messages`.
    pub fn from_path(database_id: DatabaseId, path: &str) -> FirestoreResult<Self> {
        Self::new(database_id, ResourcePath::from_string(path)?)
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    /// The collection path relative to the documents root.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Returns the document that logically contains this collection, if any.
    pub fn parent(&self) -> Option<DocumentReference> {
        let parent_path = self.path.parent()?;
        if parent_path.is_empty() {
            return None;
        }
        DocumentReference::new(self.database_id.clone(), parent_path).ok()
    }

    /// Returns a reference to the document identified by `document_id`.
    ///
    /// When `document_id` is `None`, an auto-ID is generated.
    pub fn doc(&self, document_id: Option<&str>) -> FirestoreResult<DocumentReference> {
        let id = document_id
            .map(|id| id.to_string())
            .unwrap_or_else(generate_auto_id);
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument(
                "Document ID must be non-empty and cannot contain '/'.",
            ));
        }
        DocumentReference::new(self.database_id.clone(), self.path.child([id]))
    }

    /// Resource name of the document or database root the collection hangs off; this is the
    /// `parent` of a `runQuery` request.
    pub fn parent_resource_name(&self) -> String {
        match self.parent() {
            Some(document) => document.resource_name(),
            None => self.database_id.documents_root(),
        }
    }

    /// `projects/{p}/databases/{d}/documents/{path}`
    pub fn resource_name(&self) -> String {
        format!(
            "{}/{}",
            self.database_id.documents_root(),
            self.path.canonical_string()
        )
    }

    /// Starts a query scoped to this collection.
    pub fn query(&self) -> Query {
        Query::for_collection(self.clone())
    }
}

impl Display for CollectionReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CollectionReference({})", self.path.canonical_string())
    }
}

/// One step of a document's ancestry, root first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathElement {
    Collection(CollectionReference),
    Document(DocumentReference),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentReference {
    database_id: DatabaseId,
    key: DocumentKey,
}

impl DocumentReference {
    pub fn new(database_id: DatabaseId, path: ResourcePath) -> FirestoreResult<Self> {
        let key = DocumentKey::from_path(path)?;
        Ok(Self { database_id, key })
    }

    /// Parses a slash separated document path such as `cities/sf`.
    pub fn from_path(database_id: DatabaseId, path: &str) -> FirestoreResult<Self> {
        Self::new(database_id, ResourcePath::from_string(path)?)
    }

    /// Rebuilds a reference from a fully qualified resource name as carried by reference values
    /// and document names.
    pub fn from_resource_name(name: &str) -> FirestoreResult<Self> {
        let database_id = DatabaseId::from_resource_name(name)?;
        let root = format!("{}/", database_id.documents_root());
        let relative = name.strip_prefix(root.as_str()).ok_or_else(|| {
            invalid_argument(format!("'{name}' does not name a document"))
        })?;
        Self::from_path(database_id, relative)
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The document path relative to the documents root.
    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    /// The parent collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        CollectionReference {
            database_id: self.database_id.clone(),
            path: self.key.collection_path(),
        }
    }

    /// Returns a reference to a subcollection rooted at this document.
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let sub_path = ResourcePath::from_string(path)?;
        let full_path = self.key.path().child(sub_path.iter().cloned());
        CollectionReference::new(self.database_id.clone(), full_path)
    }

    /// `projects/{p}/databases/{d}/documents/{path}`
    pub fn resource_name(&self) -> String {
        format!(
            "{}/{}",
            self.database_id.documents_root(),
            self.key.path().canonical_string()
        )
    }

    /// Splits the path into alternating collection and document references, outermost first.
    pub fn path_chain(&self) -> Vec<PathElement> {
        let segments = self.key.path();
        (1..=segments.len())
            .map(|length| {
                let path = ResourcePath::from_segments(segments.iter().take(length).cloned());
                if length % 2 == 1 {
                    PathElement::Collection(CollectionReference {
                        database_id: self.database_id.clone(),
                        path,
                    })
                } else {
                    PathElement::Document(DocumentReference {
                        database_id: self.database_id.clone(),
                        key: DocumentKey::from_path(path)
                            .unwrap_or_else(|_| self.key.clone()),
                    })
                }
            })
            .collect()
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DocumentReference({})",
            self.key.path().canonical_string()
        )
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> DatabaseId {
        DatabaseId::default("demo")
    }

    #[test]
    fn collection_doc_and_parent() {
        let cities = CollectionReference::from_path(database(), "cities").unwrap();
        assert!(cities.parent().is_none());
        assert_eq!(cities.parent_resource_name(), "projects/demo/databases/(default)/documents");

        let sf = cities.doc(Some("sf")).unwrap();
        assert_eq!(sf.id(), "sf");
        assert_eq!(sf.parent(), cities);
        assert_eq!(
            sf.resource_name(),
            "projects/demo/databases/(default)/documents/cities/sf"
        );
    }

    #[test]
    fn auto_ids_are_generated() {
        let cities = CollectionReference::from_path(database(), "cities").unwrap();
        let doc = cities.doc(None).unwrap();
        assert_eq!(doc.id().len(), AUTO_ID_LENGTH);
        assert!(cities.doc(Some("a/b")).is_err());
    }

    #[test]
    fn parses_resource_names() {
        let reference = DocumentReference::from_resource_name(
            "projects/p/databases/db/documents/rooms/eros/messages/m1",
        )
        .unwrap();
        assert_eq!(reference.database_id(), &DatabaseId::new("p", "db"));
        assert_eq!(reference.path().canonical_string(), "rooms/eros/messages/m1");

        let err = DocumentReference::from_resource_name("projects/p/databases/db/documents/rooms")
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn path_chain_alternates() {
        let reference =
            DocumentReference::from_path(database(), "rooms/eros/messages/m1").unwrap();
        let chain = reference.path_chain();
        assert_eq!(chain.len(), 4);
        match &chain[0] {
            PathElement::Collection(collection) => assert_eq!(collection.id(), "rooms"),
            other => panic!("unexpected element {other:?}"),
        }
        match &chain[1] {
            PathElement::Document(document) => assert_eq!(document.id(), "eros"),
            other => panic!("unexpected element {other:?}"),
        }
        match &chain[3] {
            PathElement::Document(document) => assert_eq!(document, &reference),
            other => panic!("unexpected element {other:?}"),
        }
        assert_eq!(
            reference.parent().parent().map(|doc| doc.id().to_string()),
            Some("eros".to_string())
        );
    }
}
