//! Client-side document engine for the Firestore REST API.
//!
//! The engine has two halves. [`codec`] maps application types onto typed wire values and
//! back, keeping *absent*, *null* and *empty* apart. [`api`] builds structured queries and
//! pages through their results with cursor continuation. Both talk to the backend only through
//! the [`remote::datastore::Datastore`] trait.

pub mod api;
pub mod codec;
mod constants;
pub mod error;
pub(crate) mod logger;
pub mod model;
pub(crate) mod query_evaluator;
pub mod remote;
pub mod value;

pub use api::{
    Bound, BoundDocument, CallOptions, CollectionReference, CursorSource, Document,
    DocumentCache, DocumentReference, FilterOperator, FirestoreClient, OrderDirection, Page,
    PaginationOptions, PagerState, PathElement, Projection, Query, QueryDocument, QueryPager,
    StructuredQuery, Transaction, UnaryOperator,
};
pub use codec::{Codec, CodecOptions, FieldCodec, NamingPolicy, Record, RecordSchema};
pub use error::{ErrorKind, FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DatabaseId, FieldPath, GeoPoint, Timestamp};
pub use remote::datastore::{Datastore, HttpDatastore, InMemoryDatastore, TokenProvider};
pub use value::{FirestoreValue, MapValue, ValueKind};
