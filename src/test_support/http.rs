use std::panic;
use std::sync::Arc;

use httpmock::MockServer;

use crate::firestore::model::DatabaseId;
use crate::firestore::remote::{Connection, HttpDatastore, StaticTokenProvider};

/// Starts a mock server, or returns `None` after logging a skip notice for `test_name` when the
/// sandbox refuses to bind a socket.
pub fn start_mock_server(test_name: &str) -> Option<MockServer> {
    match panic::catch_unwind(MockServer::start) {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!("Skipping {test_name}: unable to bind httpmock server in this environment.");
            None
        }
    }
}

/// An `HttpDatastore` aimed at `server` that authenticates as the static token `owner`.
pub fn mock_datastore(server: &MockServer, database_id: &DatabaseId) -> HttpDatastore {
    let client = reqwest::Client::builder().build().expect("reqwest client");
    let connection_builder = Connection::builder(database_id.clone())
        .with_client(client)
        .with_emulator_host(server.address().to_string());
    HttpDatastore::builder(database_id.clone())
        .with_connection_builder(connection_builder)
        .with_auth_provider(Arc::new(StaticTokenProvider::new("owner")))
        .build()
        .expect("datastore")
}
