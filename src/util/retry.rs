use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryOptions;
use crate::error::StoreError;

/// Exponential backoff with full jitter: the n-th delay is drawn
/// uniformly from `[0, min(max_delay, base * 2^n))`.
pub fn backoff_delay(options: &RetryOptions, attempt: u32) -> Duration {
    let exp = options
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(20))
        .min(options.max_delay_ms.max(1));
    let jittered = rand::thread_rng().gen_range(0..=exp);
    Duration::from_millis(jittered)
}

/// Run `op` until it succeeds, a non-transient error surfaces, or
/// `max_attempts` is exhausted.
pub async fn with_retry<T, F, Fut>(
    options: &RetryOptions,
    what: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = options.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = backoff_delay(options, attempt);
                tracing::warn!(
                    operation = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient storage failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options() -> RetryOptions {
        RetryOptions {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&options(), "put", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("throttled".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&options(), "put", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("slow down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&options(), "put", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Other("denied".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let options = RetryOptions {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        for attempt in 0..10 {
            assert!(backoff_delay(&options, attempt) <= Duration::from_millis(500));
        }
    }
}
