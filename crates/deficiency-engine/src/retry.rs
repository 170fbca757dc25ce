use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryPolicy;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Each attempt is bounded by `timeout`.
pub(crate) async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &str,
    is_retryable: impl Fn(&E) -> bool,
    on_timeout: impl Fn() -> E,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
