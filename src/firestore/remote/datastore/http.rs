use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Method;

use crate::firestore::api::{Document, DocumentReference};
use crate::firestore::error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
use crate::firestore::logger::DATASTORE_LOGGER;
use crate::firestore::model::{DatabaseId, ResourcePath};
use crate::firestore::remote::connection::{Connection, ConnectionBuilder, RequestContext};
use crate::firestore::remote::serializer::JsonProtoSerializer;

use super::{
    Datastore, NoopTokenProvider, ReadOptions, RunQueryRequest, RunQueryResponse, TokenProviderArc,
    WriteOperation,
};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// [`Datastore`] backed by the Firestore REST API.
///
/// Each call issues exactly one request; retry policy belongs to the caller.
#[derive(Clone)]
pub struct HttpDatastore {
    connection: Connection,
    serializer: JsonProtoSerializer,
    auth_provider: TokenProviderArc,
    request_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct HttpDatastoreBuilder {
    database_id: DatabaseId,
    connection_builder: ConnectionBuilder,
    auth_provider: TokenProviderArc,
    request_timeout: Option<Duration>,
}

impl HttpDatastore {
    pub fn builder(database_id: DatabaseId) -> HttpDatastoreBuilder {
        HttpDatastoreBuilder::new(database_id)
    }

    pub fn from_database_id(database_id: DatabaseId) -> FirestoreResult<Self> {
        Self::builder(database_id).build()
    }

    pub fn database_id(&self) -> &DatabaseId {
        self.serializer.database_id()
    }

    async fn request_context(&self) -> FirestoreResult<RequestContext> {
        Ok(RequestContext {
            auth_token: self.auth_provider.get_token().await?,
            request_timeout: self.request_timeout,
        })
    }

    fn observe_error(&self, operation: &str, error: FirestoreError) -> FirestoreError {
        if error.code == FirestoreErrorCode::Unauthenticated {
            self.auth_provider.invalidate_token();
        }
        DATASTORE_LOGGER.warn(format!("{operation} failed: {error}"));
        error
    }
}

#[async_trait]
impl Datastore for HttpDatastore {
    async fn get_document(
        &self,
        reference: &DocumentReference,
        options: &ReadOptions,
    ) -> FirestoreResult<Option<Document>> {
        let mut path = format!("documents/{}", encode_path(reference.path()));
        if let Some(token) = options.transaction.as_deref() {
            path.push_str("?transaction=");
            path.extend(utf8_percent_encode(token, NON_ALPHANUMERIC));
        }
        DATASTORE_LOGGER.debug(format!("GET {path}"));

        let context = self.request_context().await?;
        let response = self
            .connection
            .invoke_json_optional(Method::GET, &path, None, &context)
            .await
            .map_err(|err| self.observe_error("get_document", err))?;

        response
            .map(|json| self.serializer.decode_document(&json))
            .transpose()
    }

    async fn run_query(&self, request: &RunQueryRequest) -> FirestoreResult<RunQueryResponse> {
        let parent = request.query.parent_path();
        let path = if parent.is_empty() {
            "documents:runQuery".to_string()
        } else {
            format!("documents/{}:runQuery", encode_path(parent))
        };
        let body = self.serializer.encode_run_query_body(request);
        DATASTORE_LOGGER.debug(format!("POST {path}"));

        let context = self.request_context().await?;
        let response = self
            .connection
            .invoke_json(Method::POST, &path, Some(body), &context)
            .await
            .map_err(|err| self.observe_error("run_query", err))?;

        self.serializer.decode_run_query_response(&response)
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<String>,
    ) -> FirestoreResult<()> {
        if writes.is_empty() && transaction.is_none() {
            return Ok(());
        }
        let body = self
            .serializer
            .encode_commit_body(&writes, transaction.as_deref());
        DATASTORE_LOGGER.debug(format!("POST documents:commit ({} writes)", writes.len()));

        let context = self.request_context().await?;
        self.connection
            .invoke_json(Method::POST, "documents:commit", Some(body), &context)
            .await
            .map(|_| ())
            .map_err(|err| self.observe_error("commit", err))
    }
}

fn encode_path(path: &ResourcePath) -> String {
    path.iter()
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl HttpDatastoreBuilder {
    fn new(database_id: DatabaseId) -> Self {
        let auth_provider: TokenProviderArc = Arc::new(NoopTokenProvider);
        let connection_builder = Connection::builder(database_id.clone());
        Self {
            database_id,
            connection_builder,
            auth_provider,
            request_timeout: None,
        }
    }

    pub fn with_auth_provider(mut self, provider: TokenProviderArc) -> Self {
        self.auth_provider = provider;
        self
    }

    pub fn with_connection_builder(mut self, builder: ConnectionBuilder) -> Self {
        self.connection_builder = builder;
        self
    }

    /// Transport-level limit for each request, on top of any per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> FirestoreResult<HttpDatastore> {
        let connection = self.connection_builder.build()?;
        Ok(HttpDatastore {
            connection,
            serializer: JsonProtoSerializer::new(self.database_id),
            auth_provider: self.auth_provider,
            request_timeout: self.request_timeout,
        })
    }
}
