use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::ExchangeError;

/// Backoff between throttled attempts within one poll cycle
pub fn get_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(20)),
        multiplier: 2.0,
        randomization_factor: 0.1,
        ..Default::default()
    }
}

/// Retry an exchange call while it reports `RateLimited`.
///
/// Any other error returns immediately. `stop` is checked before every
/// retry so a cancelled worker never issues another attempt.
pub async fn retry_rate_limited<F, Fut, T, S>(
    operation_name: &str,
    max_attempts: u32,
    stop: S,
    mut operation: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
    S: Fn() -> bool,
{
    let mut backoff = get_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(ExchangeError::RateLimited(msg)) if attempt < max_attempts => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(ExchangeError::RateLimited(msg));
                };
                warn!(
                    "{} rate limited (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name, attempt, max_attempts, msg, delay
                );
                tokio::time::sleep(delay).await;
                if stop() {
                    return Err(ExchangeError::RateLimited(msg));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_only_rate_limits() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_rate_limited("place", 3, || false, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ExchangeError::RateLimited("slow down".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_rate_limited("place", 3, || false, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Rejected("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(ExchangeError::Rejected(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_rate_limited("place", 5, || true, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::RateLimited("slow down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
