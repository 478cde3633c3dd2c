//! Client-side document engine for the Firestore REST API.
//!
//! * [`firestore::codec`] converts application records to typed wire values and back, with
//!   in-place patching that reports which members changed.
//! * [`firestore::api`] builds structured queries and pages through their results with
//!   cursor continuation, optionally inside a transaction.
//! * [`firestore::remote`] carries the JSON serializer, the HTTP datastore and an in-memory
//!   datastore for tests and demos.
//! * [`logger`] provides the named loggers used throughout the crate.

pub mod firestore;
pub mod logger;

#[cfg(test)]
pub mod test_support;
