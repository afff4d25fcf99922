//! Bounded retry with exponential backoff for provider HTTP calls.
//!
//! - HTTP 429 and 5xx → retry, honoring `Retry-After` up to the backoff cap
//! - network errors (connect, timeout) → retry
//! - other 4xx → fail immediately
//! - backoff: `base`, `2×base`, `4×base`, … capped at `32×base`
//!
//! `max_retries = 0` disables retrying entirely: the first failure is final.

use std::future::Future;
use std::time::Duration;

use crate::error::ApiError;

/// How often and how patiently to retry a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Backoff before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(5))
    }

    /// Longest wait between two attempts.
    pub fn max_delay(&self) -> Duration {
        self.delay_for(5)
    }

    /// Wait before retry number `attempt + 1`, preferring the server's
    /// `Retry-After` hint but never past [`max_delay`](Self::max_delay).
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay()),
            None => self.delay_for(attempt),
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request built by `f`, retrying transient failures per `policy`.
///
/// Returns the first successful (2xx) response for the caller to decode.
///
/// # Errors
///
/// The last [`ApiError`] once it is non-retryable or retries are exhausted.
pub async fn send_with_retry<F, Fut>(
    provider: &'static str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<reqwest::Response, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0u32;
    loop {
        let (err, hint) = match f().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let hint = retry_after(&response);
                let body = response.text().await.unwrap_or_default();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    (ApiError::RateLimited { provider }, hint)
                } else {
                    (
                        ApiError::Status {
                            provider,
                            status,
                            body,
                        },
                        hint,
                    )
                }
            }
            Err(source) => (ApiError::Http { provider, source }, None),
        };

        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.backoff(attempt, hint);
        tracing::warn!(
            "{provider}: {err}; retrying in {:?} ({}/{})",
            delay,
            attempt + 1,
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
