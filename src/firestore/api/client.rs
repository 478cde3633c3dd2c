use std::sync::Arc;

use crate::firestore::api::{
    CallOptions, CollectionReference, Document, DocumentReference, PaginationOptions, Query,
    QueryPager, StructuredQuery, Transaction,
};
use crate::firestore::codec::{Codec, Record};
use crate::firestore::error::{invalid_argument, not_found, FirestoreResult};
use crate::firestore::model::{DatabaseId, FieldPath};
use crate::firestore::remote::datastore::{
    Datastore, HttpDatastore, InMemoryDatastore, ReadOptions, TokenProviderArc, WriteOperation,
};
use crate::firestore::value::{FirestoreValue, MapValue};

/// Entry point tying a [`Datastore`] to a shared [`Codec`].
///
/// ```rust,no_run
/// use firestore_docs_engine::firestore::{
///     CallOptions, DatabaseId, FirestoreClient, FirestoreResult, PaginationOptions,
/// };
///
/// # async fn run() -> FirestoreResult<()> {
/// let client = FirestoreClient::with_http_datastore(DatabaseId::default("demo-project"))?;
/// let query = client.collection("cities")?.query().limit(50)?;
/// let mut pager = client
///     .paginate(&query, PaginationOptions::default(), &CallOptions::default())
///     .await?;
/// while let Some(page) = pager.next_page().await {
///     for document in page?.documents() {
///         println!("{}", document.document().name());
///     }
/// }
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct FirestoreClient {
    database_id: DatabaseId,
    datastore: Arc<dyn Datastore>,
    codec: Arc<Codec>,
}

impl FirestoreClient {
    pub fn new(database_id: DatabaseId, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            database_id,
            datastore,
            codec: Arc::new(Codec::new()),
        }
    }

    /// Returns a client that stores documents in memory only.
    pub fn with_in_memory(database_id: DatabaseId) -> Self {
        Self::new(database_id, Arc::new(InMemoryDatastore::new()))
    }

    /// Builds a client that talks to the REST endpoints without credentials.
    pub fn with_http_datastore(database_id: DatabaseId) -> FirestoreResult<Self> {
        let datastore = HttpDatastore::from_database_id(database_id.clone())?;
        Ok(Self::new(database_id, Arc::new(datastore)))
    }

    /// Builds an HTTP-backed client that attaches tokens from `auth_provider` to every request.
    pub fn with_http_datastore_authenticated(
        database_id: DatabaseId,
        auth_provider: TokenProviderArc,
    ) -> FirestoreResult<Self> {
        let datastore = HttpDatastore::builder(database_id.clone())
            .with_auth_provider(auth_provider)
            .build()?;
        Ok(Self::new(database_id, Arc::new(datastore)))
    }

    /// Replaces the codec; every read and write through this client uses it.
    pub fn with_codec(mut self, codec: Arc<Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.datastore)
    }

    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        CollectionReference::from_path(self.database_id.clone(), path)
    }

    pub fn doc(&self, path: &str) -> FirestoreResult<DocumentReference> {
        DocumentReference::from_path(self.database_id.clone(), path)
    }

    pub fn collection_group(&self, collection_id: &str) -> FirestoreResult<Query> {
        Query::collection_group(self.database_id.clone(), collection_id)
    }

    /// Reads the raw document, `None` when it does not exist.
    pub async fn get_document(
        &self,
        reference: &DocumentReference,
        transaction: Option<&Transaction>,
        options: &CallOptions,
    ) -> FirestoreResult<Option<Document>> {
        let read_options = ReadOptions {
            transaction: match transaction {
                Some(transaction) => transaction.token().await,
                None => None,
            },
        };
        options
            .run(self.datastore.get_document(reference, &read_options))
            .await
    }

    /// Reads and decodes a document into a fresh `T`.
    pub async fn get_doc<T: Record>(
        &self,
        reference: &DocumentReference,
        options: &CallOptions,
    ) -> FirestoreResult<Option<T>> {
        match self.get_document(reference, None, options).await? {
            Some(document) => self.codec.decode_document(&document).map(Some),
            None => Ok(None),
        }
    }

    /// Patches `target` with the stored document; returns whether any member changed.
    ///
    /// # Errors
    /// Returns `firestore/not-found` when the document does not exist.
    pub async fn get_doc_into<T: Record>(
        &self,
        reference: &DocumentReference,
        target: &mut T,
        options: &CallOptions,
    ) -> FirestoreResult<bool> {
        let document = self
            .get_document(reference, None, options)
            .await?
            .ok_or_else(|| not_found(format!("Document '{}' does not exist", reference.resource_name())))?;
        self.codec.apply_document(target, &document)
    }

    /// Overwrites the document with the encoded record.
    pub async fn set_doc<T: Record>(
        &self,
        reference: &DocumentReference,
        value: &T,
        options: &CallOptions,
    ) -> FirestoreResult<()> {
        let data = self.codec.encode_fields(value)?;
        self.commit(
            vec![WriteOperation::Set {
                reference: reference.clone(),
                data,
                mask: None,
            }],
            None,
            options,
        )
        .await
    }

    /// Writes only the listed fields of the encoded record, creating the document if needed.
    pub async fn set_doc_merge<T, I, F>(
        &self,
        reference: &DocumentReference,
        value: &T,
        fields: I,
        options: &CallOptions,
    ) -> FirestoreResult<()>
    where
        T: Record,
        I: IntoIterator<Item = F>,
        F: crate::firestore::model::IntoFieldPath,
    {
        let mask = fields
            .into_iter()
            .map(|field| field.into_field_path())
            .collect::<FirestoreResult<Vec<_>>>()?;
        let data = self.codec.encode_fields(value)?;
        self.commit(
            vec![WriteOperation::Set {
                reference: reference.clone(),
                data,
                mask: Some(mask),
            }],
            None,
            options,
        )
        .await
    }

    /// Updates individual fields of an existing document.
    ///
    /// # Errors
    /// Returns `firestore/invalid-argument` when `updates` is empty and `firestore/not-found`
    /// when the document does not exist.
    pub async fn update<I>(
        &self,
        reference: &DocumentReference,
        updates: I,
        options: &CallOptions,
    ) -> FirestoreResult<()>
    where
        I: IntoIterator<Item = (FieldPath, FirestoreValue)>,
    {
        let mut data = MapValue::default();
        let mut field_paths = Vec::new();
        for (path, value) in updates {
            data.set_path(&path, value);
            field_paths.push(path);
        }
        if field_paths.is_empty() {
            return Err(invalid_argument("update() requires at least one field"));
        }
        self.commit(
            vec![WriteOperation::Update {
                reference: reference.clone(),
                data,
                field_paths,
            }],
            None,
            options,
        )
        .await
    }

    pub async fn delete(&self, reference: &DocumentReference, options: &CallOptions) -> FirestoreResult<()> {
        self.commit(
            vec![WriteOperation::Delete {
                reference: reference.clone(),
            }],
            None,
            options,
        )
        .await
    }

    /// Commits `writes` atomically, inside `transaction` when it holds a token.
    pub async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<&Transaction>,
        options: &CallOptions,
    ) -> FirestoreResult<()> {
        let token = match transaction {
            Some(transaction) => transaction.token().await,
            None => None,
        };
        options.run(self.datastore.commit(writes, token)).await
    }

    /// Compiles `query`, fetching any documents its cursors refer to.
    pub async fn resolve_query(
        &self,
        query: &Query,
        transaction: Option<&Transaction>,
        options: &CallOptions,
    ) -> FirestoreResult<StructuredQuery> {
        query
            .resolve(self.datastore.as_ref(), transaction, options)
            .await
    }

    /// Pages through `query`; `call_options` also bound every page request the pager makes.
    pub async fn paginate(
        &self,
        query: &Query,
        options: PaginationOptions,
        call_options: &CallOptions,
    ) -> FirestoreResult<QueryPager> {
        let structured = self.resolve_query(query, None, call_options).await?;
        Ok(QueryPager::new(self.datastore(), structured, options)?.with_call_options(call_options.clone()))
    }

    /// Pages through `query` inside `transaction`, beginning it on the first request when needed.
    pub async fn paginate_in_transaction(
        &self,
        query: &Query,
        options: PaginationOptions,
        transaction: &Transaction,
        call_options: &CallOptions,
    ) -> FirestoreResult<QueryPager> {
        let structured = self
            .resolve_query(query, Some(transaction), call_options)
            .await?;
        Ok(QueryPager::new(self.datastore(), structured, options)?
            .with_transaction(transaction.clone())
            .with_call_options(call_options.clone()))
    }

    /// Runs `query` to completion and decodes every document.
    pub async fn get_all<T: Record>(
        &self,
        query: &Query,
        options: PaginationOptions,
        call_options: &CallOptions,
    ) -> FirestoreResult<Vec<T>> {
        let mut pager = self.paginate(query, options, call_options).await?;
        let mut values = Vec::new();
        while let Some(page) = pager.next_page().await {
            for document in page?.documents() {
                values.push(self.codec.decode_document(document.document())?);
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::{CursorSource, OrderDirection};
    use crate::firestore::codec::RecordSchema;
    use crate::firestore::error::{ErrorKind, FirestoreErrorCode};
    use tokio_util::sync::CancellationToken;

    #[derive(Default, Debug, Clone, PartialEq)]
    struct City {
        name: String,
        population: i64,
    }

    impl Record for City {
        fn schema() -> RecordSchema<Self> {
            RecordSchema::new()
                .property("name", |c: &City| &c.name, |c: &mut City| &mut c.name)
                .property("population", |c: &City| &c.population, |c: &mut City| &mut c.population)
        }
    }

    fn city(name: &str, population: i64) -> City {
        City {
            name: name.to_string(),
            population,
        }
    }

    async fn seeded() -> FirestoreClient {
        let client = FirestoreClient::with_in_memory(DatabaseId::default("demo"));
        for (id, population) in [("sf", 870_000), ("la", 3_900_000), ("sd", 1_380_000)] {
            let reference = client.doc(&format!("cities/{id}")).unwrap();
            client
                .set_doc(&reference, &city(id, population), &CallOptions::default())
                .await
                .unwrap();
        }
        client
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let client = seeded().await;
        let reference = client.doc("cities/sf").unwrap();
        let loaded: City = client
            .get_doc(&reference, &CallOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, city("sf", 870_000));

        let missing = client.doc("cities/nowhere").unwrap();
        assert!(client
            .get_doc::<City>(&missing, &CallOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_touches_only_named_fields() {
        let client = seeded().await;
        let reference = client.doc("cities/sf").unwrap();
        client
            .update(
                &reference,
                [(
                    FieldPath::from_dot_separated("population").unwrap(),
                    FirestoreValue::from_integer(900_000),
                )],
                &CallOptions::default(),
            )
            .await
            .unwrap();

        let mut target = city("stale", 0);
        assert!(client
            .get_doc_into(&reference, &mut target, &CallOptions::default())
            .await
            .unwrap());
        assert_eq!(target, city("sf", 900_000));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let client = seeded().await;
        let reference = client.doc("cities/nowhere").unwrap();
        let err = client
            .update(
                &reference,
                [(
                    FieldPath::from_dot_separated("population").unwrap(),
                    FirestoreValue::from_integer(1),
                )],
                &CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let client = seeded().await;
        let reference = client.doc("cities/la").unwrap();
        client
            .delete(&reference, &CallOptions::default())
            .await
            .unwrap();
        assert!(client
            .get_doc::<City>(&reference, &CallOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn get_all_follows_reference_cursor() {
        let client = seeded().await;
        let query = client
            .collection("cities")
            .unwrap()
            .query()
            .order_by("population", OrderDirection::Descending)
            .unwrap()
            .start_after(CursorSource::Reference(client.doc("cities/la").unwrap()))
            .unwrap();

        let cities: Vec<City> = client
            .get_all(
                &query,
                PaginationOptions::default().with_page_size(1),
                &CallOptions::default(),
            )
            .await
            .unwrap();
        let names: Vec<_> = cities.into_iter().map(|city| city.name).collect();
        assert_eq!(names, vec!["sd", "sf"]);
    }

    #[tokio::test]
    async fn cancelled_calls_fail_without_touching_the_store() {
        let client = seeded().await;
        let token = CancellationToken::new();
        token.cancel();
        let cancelled = CallOptions::default().with_cancellation(token);

        let reference = client.doc("cities/sf").unwrap();
        let err = client
            .set_doc(&reference, &city("sf", 1), &cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        let stored: City = client
            .get_doc(&reference, &CallOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.population, 870_000);

        let err = client.delete(&reference, &cancelled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);

        let query = client.collection("cities").unwrap().query();
        let err = client
            .get_all::<City>(&query, PaginationOptions::default(), &cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);
    }

    #[tokio::test]
    async fn pager_keeps_the_client_call_options() {
        let client = seeded().await;
        let token = CancellationToken::new();
        let query = client.collection("cities").unwrap().query();
        let mut pager = client
            .paginate(
                &query,
                PaginationOptions::default().with_page_size(1),
                &CallOptions::default().with_cancellation(token.clone()),
            )
            .await
            .unwrap();

        assert!(pager.next_page().await.unwrap().is_ok());
        token.cancel();
        let err = pager.next_page().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);
    }
}
