use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};

use crate::firestore::api::{Bound, CallOptions, QueryDocument, StructuredQuery, Transaction};
use crate::firestore::constants::DEFAULT_PAGE_SIZE;
use crate::firestore::error::{internal_error, invalid_argument, FirestoreResult};
use crate::firestore::logger::PAGINATION_LOGGER;
use crate::firestore::remote::datastore::{Datastore, RunQueryRequest, TransactionSelector};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationOptions {
    pub page_size: u32,
    /// Documents to skip before the first page. Only the first request carries it.
    pub skip: u32,
    pub timeout: Option<Duration>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            skip: 0,
            timeout: None,
        }
    }
}

impl PaginationOptions {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Where a pager is in its request sequence. Page numbers start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagerState {
    NotStarted,
    Fetching(u32),
    Delivered(u32),
    Stopped,
    Failed(u32),
}

impl PagerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PagerState::Stopped | PagerState::Failed(_))
    }
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    number: u32,
    documents: Vec<QueryDocument>,
    skipped_results: u32,
    transaction: Option<String>,
}

impl Page {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn documents(&self) -> &[QueryDocument] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<QueryDocument> {
        self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents the backend skipped to satisfy the offset of this page's request.
    pub fn skipped_results(&self) -> u32 {
        self.skipped_results
    }

    /// Transaction token the page was read under, if any.
    pub fn transaction(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

/// Executes a structured query page by page.
///
/// Every request after the first resumes strictly after the last delivered document, using its
/// values for the normalised order clauses as an exclusive `startAt` cursor. Since the order
/// always ends in `__name__`, this never repeats or skips a document, and it stays correct when
/// documents are inserted ahead of the cursor between pages.
pub struct QueryPager {
    datastore: Arc<dyn Datastore>,
    query: StructuredQuery,
    options: PaginationOptions,
    call_options: CallOptions,
    transaction: Option<Transaction>,
    state: PagerState,
    cursor: Option<Bound>,
    delivered: u64,
}

impl QueryPager {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        query: StructuredQuery,
        options: PaginationOptions,
    ) -> FirestoreResult<Self> {
        if options.page_size == 0 {
            return Err(invalid_argument("Page size must be greater than zero"));
        }
        if let Some(order) = query
            .order_by()
            .iter()
            .find(|order| !query.projection().includes(order.field()))
        {
            return Err(invalid_argument(format!(
                "Cannot paginate: the projection omits ordered field '{}'",
                order.field().canonical_string()
            )));
        }
        Ok(Self {
            datastore,
            query,
            options,
            call_options: CallOptions::default(),
            transaction: None,
            state: PagerState::NotStarted,
            cursor: None,
            delivered: 0,
        })
    }

    /// Runs every page inside `transaction`, beginning it on the first request when it holds no
    /// token yet.
    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_call_options(mut self, call_options: CallOptions) -> Self {
        self.call_options = call_options;
        self
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    pub fn query(&self) -> &StructuredQuery {
        &self.query
    }

    /// Stops the pager; subsequent calls to [`QueryPager::next_page`] yield `None`.
    pub fn stop(&mut self) {
        if !self.state.is_terminal() {
            PAGINATION_LOGGER.debug("Pager stopped by caller");
            self.state = PagerState::Stopped;
        }
    }

    /// Fetches the next page, or `None` once the results are exhausted, the pager was stopped,
    /// or a previous page failed.
    pub async fn next_page(&mut self) -> Option<FirestoreResult<Page>> {
        let number = match self.state {
            PagerState::NotStarted => 1,
            PagerState::Delivered(previous) => previous + 1,
            PagerState::Fetching(_) | PagerState::Stopped | PagerState::Failed(_) => return None,
        };

        let batch = match self.remaining() {
            Some(0) => {
                self.state = PagerState::Stopped;
                return None;
            }
            Some(remaining) => self.options.page_size.min(remaining),
            None => self.options.page_size,
        };

        self.state = PagerState::Fetching(number);
        match self.fetch(number, batch).await {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => {
                self.state = PagerState::Stopped;
                None
            }
            Err(err) => {
                PAGINATION_LOGGER.warn(format!("Page {number} failed: {err}"));
                self.state = PagerState::Failed(number);
                Some(Err(err))
            }
        }
    }

    /// Turns the pager into a stream of pages. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = FirestoreResult<Page>> + Send {
        stream::unfold(self, |mut pager| async move {
            pager.next_page().await.map(|page| (page, pager))
        })
    }

    fn remaining(&self) -> Option<u32> {
        self.query.limit().map(|limit| {
            let remaining = u64::from(limit).saturating_sub(self.delivered);
            u32::try_from(remaining).unwrap_or(u32::MAX)
        })
    }

    async fn fetch(&mut self, number: u32, batch: u32) -> FirestoreResult<Option<Page>> {
        let first = number == 1;
        let mut query = self.query.clone().with_limit(Some(batch));
        query = if first {
            let offset = query.offset().saturating_add(self.options.skip);
            query.with_offset(offset)
        } else {
            query.with_offset(0).with_start_at(self.cursor.clone())
        };

        let selector = match &self.transaction {
            Some(transaction) => match transaction.token().await {
                Some(token) => TransactionSelector::Existing(token),
                None => TransactionSelector::Begin,
            },
            None => TransactionSelector::None,
        };
        let request = RunQueryRequest {
            query,
            transaction: selector,
        };

        let mut call_options = self.call_options.clone();
        if call_options.timeout.is_none() {
            call_options.timeout = self.options.timeout;
        }

        PAGINATION_LOGGER.debug(format!(
            "Requesting page {number} of {} (limit {batch})",
            self.query.parent()
        ));
        let response = call_options.run(self.datastore.run_query(&request)).await?;

        let transaction = match (&self.transaction, response.transaction.clone()) {
            (Some(transaction), Some(token)) => Some(transaction.capture(token).await),
            (Some(transaction), None) => transaction.token().await,
            (None, _) => None,
        };

        let skipped_results = response.skipped_results();
        let documents: Vec<QueryDocument> = response
            .entries
            .into_iter()
            .filter_map(|entry| {
                entry
                    .document
                    .map(|document| QueryDocument::new(document, entry.read_time))
            })
            .collect();

        if documents.is_empty() {
            PAGINATION_LOGGER.debug(format!("Page {number} came back empty; stopping"));
            return Ok(None);
        }

        if let Some(last) = documents.last() {
            self.cursor = Some(self.continuation(last)?);
        }
        self.delivered += documents.len() as u64;

        let exhausted = documents.len() < batch as usize || self.remaining() == Some(0);
        self.state = if exhausted {
            PagerState::Stopped
        } else {
            PagerState::Delivered(number)
        };

        Ok(Some(Page {
            number,
            documents,
            skipped_results,
            transaction,
        }))
    }

    fn continuation(&self, last: &QueryDocument) -> FirestoreResult<Bound> {
        let values = self
            .query
            .order_by()
            .iter()
            .map(|order| {
                last.document().order_value(order.field()).ok_or_else(|| {
                    internal_error(format!(
                        "Result document '{}' lacks ordered field '{}'",
                        last.document().name(),
                        order.field().canonical_string()
                    ))
                })
            })
            .collect::<FirestoreResult<Vec<_>>>()?;
        Ok(Bound::new(values, false))
    }
}
