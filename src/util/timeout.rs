//! Timeout and cancellation helpers.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AgentryError;

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, AgentryError>>,
) -> Result<T, AgentryError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AgentryError::Timeout(duration.as_millis() as u64)),
    }
}

/// Wrap a future with a timeout that also yields to `cancel`.
pub async fn bounded<T>(
    duration: Duration,
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, AgentryError>>,
) -> Result<T, AgentryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentryError::Canceled),
        result = with_timeout(duration, future) => result,
    }
}
