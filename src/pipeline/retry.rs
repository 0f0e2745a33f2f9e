//! Retry wrapper
//!
//! Session calls retry transient and protocol failures with exponential
//! backoff. The same policy wraps single-shot futures ([`with_retry`]) and
//! streams ([`retry_stream`]); a stream is only retried while it has not yet
//! yielded an item, since a stream cannot be resumed midway.

use crate::{BoxStream, Error, Result};
use futures::{stream, Future, StreamExt};
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min_delay * 2^attempt`, capped at `max_delay`. `attempt` is 0-based.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the next attempt, or `None` when `err` should surface.
    pub fn next_delay(&self, attempt: u32, err: &Error) -> Option<Duration> {
        (err.is_retryable() && attempt < self.max_retries).then(|| self.backoff_delay(attempt))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match policy.next_delay(attempt, &e) {
                Some(delay) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

/// Streaming counterpart of [`with_retry`].
///
/// `make` opens a fresh stream per attempt. A failure to open, or an error as
/// the very first item, is retried; once an item has been yielded, later
/// errors pass through unchanged.
pub fn retry_stream<T, F, Fut>(policy: RetryPolicy, mut make: F) -> BoxStream<'static, T>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<BoxStream<'static, T>>> + Send + 'static,
{
    let opened = async move {
        let mut attempt = 0u32;
        loop {
            let err = match make().await {
                Ok(mut inner) => match inner.next().await {
                    Some(Ok(first)) => {
                        let head = stream::once(async move { Ok(first) });
                        return Box::pin(head.chain(inner)) as BoxStream<'static, T>;
                    }
                    Some(Err(e)) => e,
                    None => return Box::pin(stream::empty()) as BoxStream<'static, T>,
                },
                Err(e) => e,
            };

            match policy.next_delay(attempt, &err) {
                Some(delay) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying stream before first item"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return Box::pin(stream::once(async move { Err(err) })) as BoxStream<'static, T>
                }
            }
        }
    };

    Box::pin(stream::once(opened).flatten())
}
