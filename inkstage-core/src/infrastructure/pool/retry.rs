// inkstage-core/src/infrastructure/pool/retry.rs

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::domain::project::EtlConfig;
use crate::error::StageError;

/// Fixed-delay retry, shared by the query, DML and acquisition paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Never below 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(etl: &EtlConfig) -> Self {
        let delay = Duration::try_from_secs_f64(etl.retry_delay_seconds).unwrap_or_default();
        Self::new(etl.max_retries, delay)
    }

    /// Time spent sleeping between attempts before the last error is surfaced.
    pub fn worst_case_wait(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        error!(
                            operation,
                            attempts = attempt,
                            "{} failed after {} attempts", operation, attempt
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
