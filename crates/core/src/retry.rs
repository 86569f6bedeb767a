//! Retry mechanism with backoff
//!
//! Two schedules are provided: exponential backoff with jitter ([`RetryConfig`],
//! used per multipart part) and a stepped schedule ([`StepBackoff`], used for
//! paginated listings) of a few short fixed delays followed by linearly
//! growing ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A retry schedule
pub trait Backoff {
    /// Total attempts, including the first one
    fn max_attempts(&self) -> u32;

    /// Delay before the next attempt after `attempt` (1-based) failed
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl Backoff for RetryConfig {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(self, attempt)
    }
}

/// Fixed delays first, then `step_ms * n` for the n-th attempt past them
///
/// The default schedule is 0s, 1s, 2s, 5s, 10s, 15s, ... over 10 attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBackoff {
    pub max_attempts: u32,
    pub fixed_delays_ms: Vec<u64>,
    pub step_ms: u64,
}

impl Default for StepBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            fixed_delays_ms: vec![0, 1000, 2000],
            step_ms: 5000,
        }
    }
}

impl Backoff for StepBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let ms = match self.fixed_delays_ms.get(index) {
            Some(ms) => *ms,
            None => {
                let past_fixed = (index - self.fixed_delays_ms.len()) as u64 + 1;
                self.step_ms.saturating_mul(past_fixed)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Retry a fallible async operation according to `backoff`
///
/// Non-retryable errors are returned as-is. When the attempt budget runs out
/// the last error is wrapped in [`Error::RetryExhausted`].
///
/// # Example
/// ```ignore
/// let page = retry_with_backoff(
///     &StepBackoff::default(),
///     || async { store.list_page(bucket, prefix, None).await },
///     is_retryable_error,
/// ).await?;
/// ```
pub async fn retry_with_backoff<T, B, F, Fut, R>(
    backoff: &B,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    B: Backoff + ?Sized,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let max_attempts = backoff.max_attempts().max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = backoff.delay(attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = delay.as_millis(),
                    error = %e,
                    "Retrying after transient error"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Calculate backoff duration with jitter
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    // Exponential backoff: initial * 2^(attempt-1)
    let base_ms = config.initial_backoff_ms * (1u64 << (attempt.max(1) - 1).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);

    let jitter_ms = rand_jitter(capped_ms);
    Duration::from_millis(capped_ms + jitter_ms)
}

/// Generate pseudo-random jitter without external RNG dependency
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Check if an error is retryable (transient)
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Network(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("timeout")
                || msg_lower.contains("timed out")
                || msg_lower.contains("connection reset")
                || msg_lower.contains("connection refused")
                || msg_lower.contains("dispatch")
                || msg_lower.contains("500")
                || msg_lower.contains("502")
                || msg_lower.contains("503")
                || msg_lower.contains("504")
                || msg_lower.contains("internal error")
                || msg_lower.contains("service unavailable")
                || msg_lower.contains("too many requests")
                || msg_lower.contains("429")
                || msg_lower.contains("throttl")
                || msg_lower.contains("request rate")
                || msg_lower.contains("slow down")
                || msg_lower.contains("slowdown")
        }
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        Error::General(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("timeout") || msg_lower.contains("temporary")
        }
        // Integrity failures must surface; retrying could mask corruption
        Error::Integrity { .. }
        | Error::Auth(_)
        | Error::NotFound(_)
        | Error::Config(_)
        | Error::CredentialsNotFound => false,
        _ => false,
    }
}

/// Retry configuration builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
