//! Bounded exponential backoff shared by every retrying caller: the
//! sequencer's downstream submitters, the mint submitter, and any outbound
//! RPC client. Delay doubles per attempt and is capped, matching the
//! `max_sleep_duration` shape this daemon family uses for its own retrying
//! RPC clients.

use std::time::Duration;

use tracing::warn;

use crate::errors::RelayerError;

const MAX_DELAY_MILLIS: u64 = 60_000;

/// `delay = min(MAX_DELAY_MILLIS, base_delay * 2^(attempt - 1))`, `attempt` 1-indexed.
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let scaled = base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(scaled.min(MAX_DELAY_MILLIS))
}

/// Retries `op` up to `max_retries` times (so `max_retries + 1` attempts
/// total) whenever it returns a retriable [`RelayerError`], sleeping with
/// [`backoff_delay`] between attempts. Non-retriable errors return
/// immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, RelayerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RelayerError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retriable() && attempt <= max_retries => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(label, attempt, ?delay, %error, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(Duration::from_secs(60), 10), Duration::from_millis(MAX_DELAY_MILLIS));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, Duration::from_millis(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RelayerError::TransientNetwork("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), RelayerError> = retry_with_backoff("test", 5, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayerError::ValidationFailure("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), RelayerError> = retry_with_backoff("test", 2, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayerError::TransientNetwork("still down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
