use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::{Document, DocumentReference, StructuredQuery};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{FieldPath, Timestamp};
use crate::firestore::value::MapValue;

pub mod http;
pub mod in_memory;

#[derive(Clone, Debug)]
pub enum WriteOperation {
    Set {
        reference: DocumentReference,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
    },
    Update {
        reference: DocumentReference,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    },
    Delete {
        reference: DocumentReference,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub transaction: Option<String>,
}

/// How a query request participates in a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransactionSelector {
    #[default]
    None,
    Existing(String),
    /// Ask the server to begin a transaction and return its token.
    Begin,
}

#[derive(Clone, Debug)]
pub struct RunQueryRequest {
    pub query: StructuredQuery,
    pub transaction: TransactionSelector,
}

/// One element of the `runQuery` response stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResultEntry {
    pub document: Option<Document>,
    pub read_time: Option<Timestamp>,
    pub skipped_results: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunQueryResponse {
    pub entries: Vec<QueryResultEntry>,
    pub transaction: Option<String>,
}

impl RunQueryResponse {
    pub fn skipped_results(&self) -> u32 {
        self.entries.iter().map(|entry| entry.skipped_results).sum()
    }
}

/// Executes requests against a Firestore backend.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Reads one document; `Ok(None)` when it does not exist.
    async fn get_document(
        &self,
        reference: &DocumentReference,
        options: &ReadOptions,
    ) -> FirestoreResult<Option<Document>>;

    async fn run_query(&self, request: &RunQueryRequest) -> FirestoreResult<RunQueryResponse>;

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<String>,
    ) -> FirestoreResult<()>;
}

/// Supplies bearer tokens for outgoing requests.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn get_token(&self) -> FirestoreResult<Option<String>>;
    fn invalidate_token(&self);
}

#[derive(Default, Clone)]
pub struct NoopTokenProvider;

#[async_trait]
impl TokenProvider for NoopTokenProvider {
    async fn get_token(&self) -> FirestoreResult<Option<String>> {
        Ok(None)
    }

    fn invalidate_token(&self) {}
}

/// A fixed token, handy for emulators and service tooling that refreshes credentials elsewhere.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> FirestoreResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    fn invalidate_token(&self) {}
}

pub type TokenProviderArc = Arc<dyn TokenProvider>;

pub use http::{HttpDatastore, HttpDatastoreBuilder};
pub use in_memory::InMemoryDatastore;
