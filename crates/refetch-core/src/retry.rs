//! Retry with exponential backoff for remote requests

use std::future::Future;
use std::time::Duration;

use crate::error::FetchError;
use crate::http::http_config;

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Retry an async request on rate limits and server errors.
///
/// Transient (connectivity) errors are NOT retried here: they go back to the
/// pipeline, which leaves the batch unchecked so the next run picks it up.
/// Retries up to `max_retries` (from global [`HttpConfig`](crate::http::HttpConfig)).
pub async fn retry_with_backoff<T, F, Fut>(label: &str, mut attempt_fn: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    retry_with_policy(label, http_config().max_retries, backoff_duration, &mut attempt_fn).await
}

async fn retry_with_policy<T, F, Fut>(
    label: &str,
    max_retries: u32,
    delay: impl Fn(u32) -> Duration,
    attempt_fn: &mut F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() && !e.is_transient() => {
                attempt += 1;
                let wait = delay(attempt);
                log::warn!("{label}: attempt {attempt}/{max_retries} failed: {e}, retry in {wait:?}");
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
