// Bounded retries for queue writes whose loss would strand a task

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use super::types::QueueError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    /// Only transient errors are retried; delays double up to `max_delay`.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts.max(1) => {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Queue write failed (retryable)"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(operation = %operation_name, attempt, error = %e, "Queue write failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn busy() -> QueueError {
        QueueError::Database(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = quick(5)
            .run("mark_completed", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = quick(3)
            .run("mark_completed", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            })
            .await;
        assert!(matches!(result, Err(QueueError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = quick(5)
            .run("mark_completed", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::TaskNotFound { id: "t".into() })
            })
            .await;
        assert!(matches!(result, Err(QueueError::TaskNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
