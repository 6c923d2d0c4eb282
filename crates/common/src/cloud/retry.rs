use std::future::Future;
use std::time::Duration;

use super::store::RemoteError;
use super::CloudError;

/// Timeout and backoff applied to every remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a single attempt
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled after each further one
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// How long to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// If the last attempt timed out the result is `NetworkTimeout`, any other
    /// exhaustion is a `NetworkFailure`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = CloudError::NetworkFailure(format!("{} was never attempted", operation));

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_retryable() => {
                    return Err(CloudError::NetworkFailure(format!("{}: {}", operation, e)))
                }
                Ok(Err(e)) => {
                    tracing::debug!("{} attempt {}/{} failed: {}", operation, attempt, attempts, e);
                    last = CloudError::NetworkFailure(format!("{}: {}", operation, e));
                }
                Err(_) => {
                    tracing::debug!(
                        "{} attempt {}/{} timed out after {:?}",
                        operation,
                        attempt,
                        attempts,
                        self.timeout
                    );
                    last = CloudError::NetworkTimeout(format!(
                        "{} timed out after {:?}",
                        operation, self.timeout
                    ));
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        tracing::warn!("{} gave up after {} attempts: {}", operation, attempts, last);
        Err(last)
    }
}
