//! Per-client token bucket and retry schedule for upstream calls
//! (spec.md §5 "Rate limiting"). Bounded process-global state with
//! explicit construction and no global statics.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::adapter::BskyError;

const LOG_TARGET: &str = "skygent::sync::rate_limit";

/// Enforces a minimum interval between upstream calls made through the
/// same adapter instance.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_call: Mutex::new(None) }
    }

    /// Waits until at least `min_interval` has elapsed since the
    /// previous `acquire`, then reserves the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Runs `op`, retrying on [`BskyError::is_transient`] errors with
/// exponential, jittered backoff up to `max_retries` times (spec.md §5).
pub async fn with_retry<T, F, Fut>(base_delay: Duration, max_retries: u32, operation: &str, op: F) -> Result<T, BskyError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BskyError>>,
{
    op.retry(ExponentialBuilder::default().with_jitter().with_min_delay(base_delay).with_max_times(max_retries as usize))
        .when(BskyError::is_transient)
        .notify(|err, delay| {
            debug!(target: LOG_TARGET, operation, err = %err, delay_ms = delay.as_millis(), "retrying upstream call");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = StdInstant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
