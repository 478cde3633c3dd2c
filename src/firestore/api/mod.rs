//! Document references, structured queries and the pagination engine.

mod bound;
mod call_options;
mod client;
mod cursor;
mod document_cache;
mod pagination;
pub(crate) mod query;
mod reference;
mod snapshot;
mod transaction;

pub use bound::BoundDocument;
pub use call_options::CallOptions;
pub use client::FirestoreClient;
pub use cursor::{Bound, CursorPosition, CursorSource};
pub use document_cache::DocumentCache;
pub use pagination::{Page, PagerState, PaginationOptions, QueryPager};
pub use query::{
    FieldFilter, Filter, FilterOperator, OrderBy, OrderDirection, Projection, Query,
    StructuredQuery, UnaryFilter, UnaryOperator,
};
pub use reference::{CollectionReference, DocumentReference, PathElement};
pub use snapshot::{Document, QueryDocument};
pub use transaction::Transaction;
