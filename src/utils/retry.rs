use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Retry policy for RPC calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; `None` retries forever
    pub max_retries: Option<u32>,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential_backoff: bool,
    /// Upper bound for the backoff delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            base_delay: Duration::from_secs(2),
            exponential_backoff: true,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: Some(max_retries.max(1)),
            base_delay,
            ..Self::default()
        }
    }
}

/// Runs `operation` until it succeeds or the attempt budget is spent.
///
/// `label` names the operation in logs. The last error is returned once
/// `max_retries` attempts have failed.
pub async fn retry_async<F, Fut, T, E>(label: &str, mut operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.base_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(label, attempt, "✅ Succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => {
                if let Some(max) = config.max_retries
                    && attempt >= max
                {
                    warn!(label, attempt, error = %e, "🚫 Retries exhausted");
                    return Err(e);
                }

                warn!(label, attempt, error = %e, ?delay, "⏳ Attempt failed, retrying");
                sleep(delay).await;

                if config.exponential_backoff {
                    delay = std::cmp::min(delay * 2, config.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    fn config(max_retries: u32, base_ms: u64, exponential_backoff: bool) -> RetryConfig {
        RetryConfig {
            max_retries: Some(max_retries),
            base_delay: Duration::from_millis(base_ms),
            exponential_backoff,
            max_delay: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn immediate_success_does_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_async(
            "immediate",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("success") }
            },
            &config(3, 10, true),
        )
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_async(
            "flaky",
            move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if count < 3 {
                        Err(format!("Attempt {} failed", count))
                    } else {
                        Ok("success after retries")
                    }
                }
            },
            &config(5, 10, false),
        )
        .await;

        assert_eq!(result.unwrap(), "success after retries");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_async(
            "always failing",
            move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(format!("Attempt {} failed", count)) }
            },
            &config(3, 10, false),
        )
        .await;

        assert_eq!(result.unwrap_err(), "Attempt 3 failed");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_doubles_delay() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let start = Instant::now();

        let result = retry_async(
            "backoff",
            move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if count < 4 {
                        Err(format!("Attempt {} failed", count))
                    } else {
                        Ok("success")
                    }
                }
            },
            &config(4, 50, true),
        )
        .await;

        assert!(result.is_ok());
        // 50ms + 100ms + 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped_by_max_delay() {
        let start = Instant::now();
        let retry = RetryConfig {
            max_retries: Some(4),
            base_delay: Duration::from_millis(100),
            exponential_backoff: true,
            max_delay: Duration::from_millis(150),
        };

        let result = retry_async("capped", || async { Err::<(), _>("down") }, &retry).await;

        assert!(result.is_err());
        // 100ms + 150ms + 150ms
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }
}
