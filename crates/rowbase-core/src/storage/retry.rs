//! Running blocking storage calls from async code.

use std::sync::Arc;

use tracing::warn;

use super::RetryPolicy;
use crate::error::{Error, Result};

/// Run `f` on the blocking pool, retrying transient failures with backoff.
///
/// After `max_attempts` transient failures the last error surfaces as
/// [`Error::StorageUnavailable`]. Non-transient errors return immediately.
pub async fn with_retry<T, F>(policy: &RetryPolicy, operation: &'static str, f: F) -> Result<T>
where
    F: Fn() -> Result<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let call = Arc::clone(&f);
        let result = tokio::task::spawn_blocking(move || call())
            .await
            .map_err(|e| Error::Consistency(format!("{operation} task failed: {e}")))?;

        match result {
            Err(e) if e.is_transient() => {
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %e, "storage unavailable");
                    return Err(Error::StorageUnavailable {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(operation, attempt, ?delay, error = %e, "transient storage failure, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
