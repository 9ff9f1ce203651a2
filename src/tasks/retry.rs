use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Attempt budget for one job. Each attempt runs under `timeout`; the wait
/// before attempt `n` (n >= 2) is `backoff * 2^(n-2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Retrying cannot help (missing ticket, bad payload).
    #[error("{0}")]
    Permanent(String),
    #[error("{0}")]
    Transient(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// What happened across all attempts of one execution.
#[derive(Debug)]
pub struct Execution<T> {
    pub attempts: u32,
    pub result: Result<T, JobError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl<T> Execution<T> {
    pub fn status(&self) -> JobStatus {
        if self.result.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent. `attempt_fn` receives the 1-based attempt number.
pub async fn execute_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt_fn: F,
) -> Execution<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let started_at = Utc::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    let result = loop {
        attempt += 1;
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.timeout, attempt_fn(attempt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::Transient(format!(
                "attempt timed out after {}s",
                policy.timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(value) => break Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!("{label} attempt {attempt}/{max_attempts} failed, retrying: {e}");
            }
            Err(e) => break Err(e),
        }
    };

    Execution {
        attempts: attempt,
        result,
        started_at,
        completed_at: Utc::now(),
    }
}
