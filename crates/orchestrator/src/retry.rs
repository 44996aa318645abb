//! Retry policy for worker attempts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::worker::WorkError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Runs `attempt_fn` up to `max_attempts` times, backing off exponentially
/// between attempts.  Only [`WorkError::Retryable`] triggers another attempt;
/// cancellation short-circuits immediately.
pub(crate) async fn retry_work<T, F, Fut>(
    token: &CancellationToken,
    max_attempts: u32,
    mut attempt_fn: F,
) -> Result<T, WorkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WorkError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if token.is_cancelled() {
            return Err(WorkError::Canceled);
        }

        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(WorkError::Retryable(err)) if attempt < max_attempts => {
                debug!(attempt, error = %err, "worker failed with retryable error");
                tokio::select! {
                    _ = token.cancelled() => return Err(WorkError::Canceled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}
