//! Retry policy for upstream catalog calls.
//!
//! Exponential backoff with proportional jitter and a capped maximum delay.
//! Only transient failures (timeout, connect/reset, 429, 5xx) are retried;
//! other HTTP errors fail immediately and surface as a per-item error. A
//! server-supplied Retry-After wins over the computed delay when larger.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (total attempts = retries + 1).
    pub retries: u32,
    pub base: Duration,
    pub factor: f64,
    /// Proportional jitter, e.g. 0.35 adds up to ±35% of the computed delay.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 4,
            base: Duration::from_millis(600),
            factor: 2.0,
            jitter: 0.35,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Smaller budget used for secondary by-id detail lookups.
    pub fn detail_fallback() -> Self {
        Self {
            retries: 2,
            base: Duration::from_millis(800),
            ..Self::default()
        }
    }

    /// Backoff delay for the given zero-based attempt, jittered and capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            (capped + delta).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(jittered.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Run `op` with this policy. `op` errors are classified by
    /// [`FetchError::is_transient`]; permanent errors return immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    let delay = err
                        .retry_after
                        .filter(|ra| *ra > self.delay_for(attempt))
                        .unwrap_or_else(|| self.delay_for(attempt));
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err.message, "transient upstream failure; backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Classified upstream failure.
#[derive(Debug)]
pub struct FetchError {
    pub message: String,
    pub transient: bool,
    /// Server-supplied Retry-After hint, when present.
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        self.retry_after = hint;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Classify an HTTP status: 429 and 5xx retry, other 4xx fail fast.
    pub fn from_status(status: reqwest::StatusCode, body_snippet: &str) -> Self {
        let message = format!("HTTP {status}: {body_snippet}");
        if status.as_u16() == 429 || status.is_server_error() {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection-level failures are worth a retry; body
        // decode errors are not (the server answered, the payload is bad).
        let transient = err.is_timeout() || err.is_connect() || err.is_request();
        Self {
            message: err.to_string(),
            transient: transient && !err.is_decode(),
            retry_after: None,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FetchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        // 600ms * 2^6 would be 38.4s without the cap.
        assert_eq!(policy.delay_for(6), Duration::from_secs(10));
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(600));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2400));
    }

    #[test]
    fn classifies_statuses() {
        use reqwest::StatusCode;
        assert!(FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(FetchError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!FetchError::from_status(StatusCode::NOT_FOUND, "").is_transient());
        assert!(!FetchError::from_status(StatusCode::FORBIDDEN, "").is_transient());
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let policy = RetryPolicy::default();
        let mut calls = 0u32;
        let res: Result<(), _> = policy
            .run(|| {
                calls += 1;
                async { Err(FetchError::permanent("HTTP 404")) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_budget() {
        let policy = RetryPolicy {
            retries: 2,
            base: Duration::from_millis(1),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let mut calls = 0u32;
        let res: Result<(), _> = policy
            .run(|| {
                calls += 1;
                async { Err(FetchError::transient("timeout")) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls, 3);
    }
}
