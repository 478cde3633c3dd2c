use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::firestore::error::{cancelled, FirestoreResult};

/// Per-call limits applied to every network-bound operation.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Drives `operation` until it completes, the token fires, or the timeout elapses.
    pub async fn run<T, F>(&self, operation: F) -> FirestoreResult<T>
    where
        F: Future<Output = FirestoreResult<T>>,
    {
        if self.is_cancelled() {
            return Err(cancelled("Operation cancelled before it started"));
        }
        let token = self.cancellation.clone().unwrap_or_default();
        let bounded = async {
            match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, operation).await {
                    Ok(result) => result,
                    Err(_) => Err(cancelled(format!("Operation timed out after {timeout:?}"))),
                },
                None => operation.await,
            }
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(cancelled("Operation cancelled")),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::ErrorKind;

    #[tokio::test]
    async fn passes_through_results() {
        let value = CallOptions::default().run(async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn timeout_surfaces_cancellation() {
        let options = CallOptions::default().with_timeout(Duration::from_millis(10));
        let err = options
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);
    }

    #[tokio::test]
    async fn fired_token_cancels_pending_operation() {
        let token = CancellationToken::new();
        let options = CallOptions::default().with_cancellation(token.clone());
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = options
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancellation());

        let err = options.run(async { Ok(()) }).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
