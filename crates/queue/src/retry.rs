//! Fixed-delay retry for batch jobs.

#![allow(missing_docs)]

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use wakeup_common::AppResult;
use wakeup_core::MaterializationSummary;

/// Retry configuration with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between the end of one attempt and the start of the next.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Check if another attempt may follow the given (1-based) attempt.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A job result that can ask for the job to be run again.
pub trait Retryable {
    fn needs_retry(&self) -> bool;
}

impl Retryable for MaterializationSummary {
    fn needs_retry(&self) -> bool {
        self.has_failures()
    }
}

/// How a retried job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The job finished without asking for a retry.
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed or asked for a retry.
    Exhausted {
        attempts: u32,
        last_value: Option<T>,
        last_error: Option<String>,
    },
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Run `job` until it succeeds or `config.max_attempts` is reached.
///
/// Exhaustion is logged at error level and returned, never raised.
pub async fn run_with_retry<T, F, Fut>(config: RetryConfig, name: &str, mut job: F) -> RetryOutcome<T>
where
    T: Retryable + std::fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut last_value = None;
    let mut last_error = None;
    let mut attempt = 0;

    while attempt < config.max_attempts {
        attempt += 1;
        match job(attempt).await {
            Ok(value) if !value.needs_retry() => {
                if attempt > 1 {
                    tracing::info!(job = name, attempt, "Job succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Ok(value) => {
                tracing::warn!(job = name, attempt, result = ?value, "Job finished with failures");
                last_value = Some(value);
                last_error = None;
            }
            Err(e) => {
                tracing::warn!(job = name, attempt, error = %e, "Job attempt failed");
                last_value = None;
                last_error = Some(e.to_string());
            }
        }

        if config.should_retry(attempt) {
            tokio::time::sleep(config.delay).await;
        }
    }

    tracing::error!(
        job = name,
        attempts = attempt,
        last_error = last_error.as_deref().unwrap_or("partial failure"),
        "Job abandoned after exhausting retries"
    );
    RetryOutcome::Exhausted {
        attempts: attempt,
        last_value,
        last_error,
    }
}

/// Run `job` with retries on a background task and return immediately.
pub fn spawn_with_retry<T, F, Fut>(config: RetryConfig, name: &'static str, job: F) -> JoinHandle<RetryOutcome<T>>
where
    T: Retryable + std::fmt::Debug + Send + 'static,
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
{
    tokio::spawn(run_with_retry(config, name, job))
}
