//! Retry logic with exponential backoff for page, segment and playlist requests
//!
//! Transient HTTP failures (timeouts, refused connections, 5xx and 429 responses) are
//! retried with exponential backoff and optional jitter. Everything else fails on the
//! first attempt, so a 404 page costs exactly one request.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::config::RetryConfig;
//! use media_dl::error::Error;
//! use media_dl::retry::with_retry;
//!
//! # async fn example(client: reqwest::Client) -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let client = &client;
//! let body = with_retry(&config, || async move {
//!     let response = client.get("https://example.com/1.png").send().await?;
//!     Ok::<_, Error>(response.error_for_status()?.bytes().await?)
//! })
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                e.status().is_some_and(is_retryable_status)
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A vanished working directory or a cancelled task will not come back
            Error::DirectoryMissing { .. } | Error::Cancelled => false,
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::Image(_)
            | Error::Playlist(_)
            | Error::Source(_)
            | Error::NotFound(_)
            | Error::ExternalTool(_)
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }
}

/// Server-side statuses worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, then up to `config.max_attempts` more times while it keeps
/// failing with retryable errors. The delay starts at `initial_delay`, grows by
/// `backoff_multiplier` and is capped at `max_delay`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::debug!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(wait).await;

                let next = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next.min(config.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Jitter uniformly between 0% and 100% of the delay, so the result lies in
/// `delay..=2 * delay`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
