//! Bounded exponential-backoff retry for operations that may fail
//! transiently. Permanent failures surface immediately; transient ones are
//! retried up to the attempt budget with deterministic jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{OpError, Result, TandemError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1,
            max_delay_secs: 60,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before the given retry (zero-based attempt index): doubles
    /// from the initial delay, capped at the maximum. A rate-limit hint
    /// from the failure overrides the computed delay.
    pub fn delay_for(&self, attempt: u32, failure: &OpError) -> Duration {
        if let Some(hinted) = failure.suggested_delay() {
            return hinted.min(Duration::from_secs(self.max_delay_secs));
        }
        let base = self
            .initial_delay_secs
            .saturating_mul(1u64 << attempt.min(32));
        let mut secs = base.min(self.max_delay_secs);
        if self.jitter {
            secs = secs.saturating_add(jitter_secs(attempt)).min(self.max_delay_secs);
        }
        Duration::from_secs(secs)
    }
}

/// Deterministic pseudo-random jitter from the attempt number; avoids
/// pulling in a rand dependency for a one-second smear.
fn jitter_secs(attempt: u32) -> u64 {
    u64::from(attempt.wrapping_mul(2654435761) % 2)
}

/// Run `op` under the retry policy. Each attempt's failure is classified;
/// transient failures are retried after a backoff, permanent ones are
/// returned immediately. Exhausting the budget yields `RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, OpError>>,
{
    let mut last: Option<OpError> = None;

    for attempt in 0..config.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if failure.is_permanent() {
                    error!(operation, attempt = attempt + 1, error = %failure, "Permanent failure");
                    return Err(TandemError::Operation(failure));
                }

                let is_last = attempt + 1 == config.max_attempts;
                if !is_last {
                    let delay = config.delay_for(attempt, &failure);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last = Some(failure);
            }
        }
    }

    let message = last.map(|e| e.to_string()).unwrap_or_default();
    error!(operation, attempts = config.max_attempts, message, "Retries exhausted");
    Err(TandemError::RetriesExhausted {
        attempts: config.max_attempts,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_secs: 0,
            max_delay_secs: 0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let result = with_retry(&fast_config(), "send", move || {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OpError::NetworkError("connection reset".to_string()))
                } else {
                    Ok("sent")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let result: Result<()> = with_retry(&fast_config(), "send", move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(OpError::AuthFailure("401".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(TandemError::Operation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let result: Result<()> = with_retry(&fast_config(), "send", || async {
            Err(OpError::ServerError("503".to_string()))
        })
        .await;

        match result {
            Err(TandemError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_secs: 1,
            max_delay_secs: 60,
            jitter: false,
        };
        let failure = OpError::ServerError("500".to_string());
        assert_eq!(config.delay_for(0, &failure), Duration::from_secs(1));
        assert_eq!(config.delay_for(1, &failure), Duration::from_secs(2));
        assert_eq!(config.delay_for(2, &failure), Duration::from_secs(4));
        assert_eq!(config.delay_for(10, &failure), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limit_hint_overrides_backoff() {
        let config = RetryConfig::default();
        let failure = OpError::RateLimited {
            retry_after_secs: Some(9),
        };
        assert_eq!(config.delay_for(0, &failure), Duration::from_secs(9));
    }
}
