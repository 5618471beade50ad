use super::{ExchangeError, ExchangeRateLimiter};
use crate::models::Exchange;
use reqwest::{RequestBuilder, Response};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Attempts for reads, which are safe to resend
pub(crate) const READ_ATTEMPTS: u32 = 3;
/// Order placement is sent once: a timed-out order may still have filled
pub(crate) const ORDER_ATTEMPTS: u32 = 1;

const INITIAL_BACKOFF_MS: u64 = 250;

/// Send a rate-limited request, retrying 429/5xx and network errors up to
/// `max_attempts` times
///
/// `build` is called once per attempt so signed requests get a fresh
/// timestamp. Any other status is returned to the caller for decoding.
pub(crate) async fn send_with_retry<F>(
    exchange: Exchange,
    limiter: &Arc<ExchangeRateLimiter>,
    max_attempts: u32,
    build: F,
) -> Result<Response, ExchangeError>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        limiter.until_ready().await;

        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                let retryable = status.as_u16() == 429 || status.is_server_error();

                if !retryable {
                    return Ok(response);
                }

                if attempt == max_attempts {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ExchangeError::Status {
                        exchange,
                        status: status.as_u16(),
                        body,
                    });
                }

                tracing::warn!(
                    "{} returned {}, retrying in {:?} (attempt {}/{})",
                    exchange,
                    status,
                    backoff,
                    attempt,
                    max_attempts
                );
            }
            Err(e) if attempt < max_attempts && (e.is_timeout() || e.is_connect()) => {
                tracing::warn!(
                    "Network error talking to {}: {}, retrying in {:?} (attempt {}/{})",
                    exchange,
                    e,
                    backoff,
                    attempt,
                    max_attempts
                );
            }
            Err(e) => return Err(ExchangeError::Http(e)),
        }

        sleep(backoff).await;
    }

    Err(ExchangeError::RetriesExhausted(max_attempts))
}
