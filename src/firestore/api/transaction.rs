use std::sync::Arc;

use async_lock::Mutex;

/// Opaque transaction token shared between the calls that run inside one transaction.
///
/// A fresh transaction carries no token; the first query run through it asks the server to
/// begin one and stores the returned token for every later request. Clones share the token.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    token: Arc<Mutex<Option<String>>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a token obtained elsewhere.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(token.into()))),
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    pub async fn has_token(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Stores `token` unless one is already held; returns the token in effect.
    pub(crate) async fn capture(&self, token: String) -> String {
        let mut guard = self.token.lock().await;
        guard.get_or_insert(token).clone()
    }
}
