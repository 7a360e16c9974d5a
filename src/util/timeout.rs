//! Deadline helpers for external calls (model, tool, remote agent).

use std::future::Future;
use std::time::Duration;

use crate::error::ArborError;

/// Wrap a future with a timeout. Expiry maps to [`ArborError::Timeout`].
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, ArborError>>,
) -> Result<T, ArborError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ArborError::Timeout(duration.as_millis() as u64)),
    }
}

/// Like [`with_timeout`], but unbounded when `deadline` is `None`.
pub async fn with_deadline<T>(
    deadline: Option<Duration>,
    future: impl Future<Output = Result<T, ArborError>>,
) -> Result<T, ArborError> {
    match deadline {
        Some(duration) => with_timeout(duration, future).await,
        None => future.await,
    }
}
