//! Test utilities shared across crate-level unit tests.

pub mod http;

pub use http::{mock_datastore, start_mock_server};
