use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::firestore::api::{Document, DocumentReference};
use crate::firestore::error::{aborted, not_found, FirestoreResult};
use crate::firestore::model::{FieldPath, Timestamp};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::MapValue;

use super::{
    Datastore, QueryResultEntry, ReadOptions, RunQueryRequest, RunQueryResponse,
    TransactionSelector, WriteOperation,
};

/// A process-local backend that evaluates queries with the server's ordering and filtering rules.
///
/// Every `runQuery` request is recorded so tests can assert on what a pager actually asked for.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Document>,
    recorded_queries: Vec<RunQueryRequest>,
    open_transactions: BTreeSet<String>,
    issued_transactions: u64,
    last_write: Option<Timestamp>,
}

impl State {
    fn tick(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let next = match self.last_write {
            Some(last) if now <= last => {
                if last.nanos >= 999_999_999 {
                    Timestamp::new(last.seconds + 1, 0)
                } else {
                    Timestamp::new(last.seconds, last.nanos + 1)
                }
            }
            _ => now,
        };
        self.last_write = Some(next);
        next
    }

    fn check_transaction(&self, token: Option<&str>) -> FirestoreResult<()> {
        match token {
            Some(token) if !self.open_transactions.contains(token) => Err(aborted(format!(
                "Transaction '{token}' is not active"
            ))),
            _ => Ok(()),
        }
    }

    fn store(&mut self, reference: &DocumentReference, fields: MapValue) {
        let now = self.tick();
        store_at(&mut self.documents, reference, fields, now);
    }
}

fn store_at(
    documents: &mut BTreeMap<String, Document>,
    reference: &DocumentReference,
    fields: MapValue,
    now: Timestamp,
) {
    let name = reference.resource_name();
    let create_time = documents
        .get(&name)
        .and_then(Document::create_time)
        .unwrap_or(now);
    documents.insert(
        name,
        Document::new(reference.clone(), fields).with_times(Some(create_time), Some(now)),
    );
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document as-is, stamping write times the way a commit would.
    pub fn insert_document(&self, document: Document) {
        let reference = document.reference().clone();
        self.lock().store(&reference, document.into_fields());
    }

    pub fn documents(&self) -> Vec<Document> {
        self.lock().documents.values().cloned().collect()
    }

    pub fn recorded_queries(&self) -> Vec<RunQueryRequest> {
        self.lock().recorded_queries.clone()
    }

    /// Number of transactions begun through `runQuery`.
    pub fn issued_transactions(&self) -> u64 {
        self.lock().issued_transactions
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn merge_paths(target: &mut MapValue, data: &MapValue, paths: &[FieldPath]) {
    for path in paths {
        match data.get_path(path) {
            Some(value) => target.set_path(path, value.clone()),
            None => {
                target.remove_path(path);
            }
        }
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(
        &self,
        reference: &DocumentReference,
        options: &ReadOptions,
    ) -> FirestoreResult<Option<Document>> {
        let state = self.lock();
        state.check_transaction(options.transaction.as_deref())?;
        Ok(state.documents.get(&reference.resource_name()).cloned())
    }

    async fn run_query(&self, request: &RunQueryRequest) -> FirestoreResult<RunQueryResponse> {
        let mut state = self.lock();
        state.recorded_queries.push(request.clone());

        let transaction = match &request.transaction {
            TransactionSelector::None => None,
            TransactionSelector::Existing(token) => {
                state.check_transaction(Some(token))?;
                None
            }
            TransactionSelector::Begin => {
                state.issued_transactions += 1;
                let token = format!("txn-{}", state.issued_transactions);
                state.open_transactions.insert(token.clone());
                Some(token)
            }
        };

        let evaluation = apply_query_to_documents(state.documents.values().cloned(), &request.query);
        let read_time = Some(Timestamp::now());
        let mut entries: Vec<QueryResultEntry> = evaluation
            .documents
            .into_iter()
            .map(|document| QueryResultEntry {
                document: Some(document),
                read_time,
                skipped_results: 0,
            })
            .collect();
        match entries.first_mut() {
            Some(first) => first.skipped_results = evaluation.skipped,
            None => entries.push(QueryResultEntry {
                document: None,
                read_time,
                skipped_results: evaluation.skipped,
            }),
        }

        Ok(RunQueryResponse {
            entries,
            transaction,
        })
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<String>,
    ) -> FirestoreResult<()> {
        let mut state = self.lock();
        state.check_transaction(transaction.as_deref())?;

        // Writes land on a staged copy so each precondition sees the batch's earlier writes and
        // a failing batch leaves nothing applied.
        let commit_time = state.tick();
        let mut staged = state.documents.clone();
        for write in writes {
            match write {
                WriteOperation::Set {
                    reference,
                    data,
                    mask: None,
                } => store_at(&mut staged, &reference, data, commit_time),
                WriteOperation::Set {
                    reference,
                    data,
                    mask: Some(mask),
                } => {
                    let mut fields = staged
                        .get(&reference.resource_name())
                        .map(|existing| existing.fields().clone())
                        .unwrap_or_default();
                    merge_paths(&mut fields, &data, &mask);
                    store_at(&mut staged, &reference, fields, commit_time);
                }
                WriteOperation::Update {
                    reference,
                    data,
                    field_paths,
                } => {
                    let Some(existing) = staged.get(&reference.resource_name()) else {
                        return Err(not_found(format!(
                            "No document to update: {}",
                            reference.resource_name()
                        )));
                    };
                    let mut fields = existing.fields().clone();
                    merge_paths(&mut fields, &data, &field_paths);
                    store_at(&mut staged, &reference, fields, commit_time);
                }
                WriteOperation::Delete { reference } => {
                    staged.remove(&reference.resource_name());
                }
            }
        }
        state.documents = staged;

        if let Some(token) = transaction {
            state.open_transactions.remove(&token);
        }
        Ok(())
    }
}
