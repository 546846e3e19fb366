//! Bounded exponential backoff for transient API failures.
//!
//! Which errors are retried is up to the caller: [`with_retry`] retries
//! everything [`fleetops_core::GatewayError::is_transient`] accepts
//! (transport failures, 429, 5xx), [`with_retry_if`] takes its own predicate.

use std::future::Future;
use std::time::Duration;

use fleetops_core::{GatewayError, GatewayResult};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries after 1s, 2s and 4s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
        backoff_multiplier: 2.0,
    };

    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    /// Delay before retry number `attempt` (0-indexed), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Run `op`, retrying transient failures per `config`.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, label: &str, op: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    with_retry_if(config, label, GatewayError::is_transient, op).await
}

/// Run `op`, retrying failures `retryable` accepts per `config`.
pub async fn with_retry_if<T, F, Fut, R>(
    config: RetryConfig,
    label: &str,
    retryable: R,
    mut op: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
    R: Fn(&GatewayError) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    request = %label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient GitHub error, retrying"
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

    fn server_error() -> GatewayError {
        GatewayError::Api {
            status: 503,
            endpoint: "/repos/acme/a".to_string(),
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryConfig::DEFAULT, "GET /repos/acme/a", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: GatewayResult<()> = with_retry(RetryConfig::DEFAULT, "GET /repos/acme/a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(server_error())
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_limits_retries() {
        let calls = AtomicU32::new(0);
        let result: GatewayResult<()> = with_retry_if(
            RetryConfig::DEFAULT,
            "GET /repos/acme/a",
            |e| matches!(e, GatewayError::Api { status: 429, .. }),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: GatewayResult<()> = with_retry(RetryConfig::DEFAULT, "GET /repos/acme/a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::NotFound("acme/a".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
