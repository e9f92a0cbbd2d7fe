use anyhow::{anyhow, Result};
use rand::Rng;
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_str, v_u64, Domain, Level};

/// Backoff schedule for one poll's worth of fetch attempts.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// No retries; used by simulated-clock runs where sleeping is wasted time.
    pub fn immediate() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Doubling delay after the given failed attempt, capped, then jittered.
    fn backoff(&self, failed_attempt: u32) -> Duration {
        let doubled = self.base_delay_ms.saturating_mul(1u64 << failed_attempt.min(32));
        let capped = doubled.min(self.max_delay_ms) as f64;
        let spread = capped * self.jitter_factor;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + offset).max(0.0) as u64)
    }
}

/// An error another attempt cannot fix: a 4xx answer, a JSON-RPC error
/// payload, a body that does not decode. `retry_async` gives up on it at once.
#[derive(Debug)]
pub struct Permanent(pub String);

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Permanent {}

pub fn permanent(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(Permanent(msg.into()))
}

pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Permanent>())
}

/// HTTP statuses worth another attempt.
pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Error for a non-2xx answer, marked permanent unless the status is
/// one a later attempt may clear.
pub fn http_status_error(method: &str, status: u16) -> anyhow::Error {
    let msg = format!("RPC {method} returned HTTP {status}");
    if is_retryable_http_error(status) {
        anyhow!(msg)
    } else {
        permanent(msg)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The last error is returned.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, op: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if is_permanent(&err) || attempt >= config.attempts() {
            return Err(err);
        }
        let delay = config.backoff(attempt - 1);
        log(
            Level::Debug,
            Domain::Feed,
            "retry",
            obj(&[
                ("op", v_str(op)),
                ("attempt", v_u64(attempt as u64)),
                ("max_attempts", v_u64(config.attempts() as u64)),
                ("delay_ms", v_u64(delay.as_millis() as u64)),
                ("error", v_str(&err.to_string())),
            ]),
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Operation failing with `err` for its first `fail_until` calls.
    fn counting(
        fail_until: u32,
        err: fn() -> anyhow::Error,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<u32>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let op = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < fail_until { Err(err()) } else { Ok(n) })
        };
        (calls, op)
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };

        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(4), Duration::from_millis(1000));
        assert_eq!(config.backoff(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let config = RetryConfig { max_retries: 3, base_delay_ms: 1, ..Default::default() };
        let (calls, op) = counting(2, || anyhow!("connection reset"));

        let result = retry_async(&config, "test", op).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_after_first_attempt() {
        let config = RetryConfig { max_retries: 3, base_delay_ms: 1, ..Default::default() };
        let (calls, op) = counting(10, || http_status_error("eth_blockNumber", 404));

        let err = retry_async(&config, "test", op).await.unwrap_err();
        assert!(is_permanent(&err));
        assert!(err.to_string().contains("404"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_status_uses_every_attempt() {
        let config = RetryConfig { max_retries: 2, base_delay_ms: 1, ..Default::default() };
        let (calls, op) = counting(10, || http_status_error("eth_blockNumber", 503));

        let err = retry_async(&config, "test", op).await.unwrap_err();
        assert!(!is_permanent(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_immediate_gives_up_after_one_call() {
        let (calls, op) = counting(10, || anyhow!("down"));
        assert!(retry_async(&RetryConfig::immediate(), "test", op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_permanent_survives_context() {
        let err = permanent("bad payload").context("fetching block");
        assert!(is_permanent(&err));
        assert!(!is_permanent(&anyhow!("timeout")));
    }
}
