use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::Error;

/// Decides whether a settled failure is worth another attempt.
pub trait RetryCondition: Send + Sync {
    fn should_retry(&self, error: &Error) -> bool;
}

/// Retry when no status code was obtained, or the status is a server error,
/// or the server reported a request timeout.
#[derive(Debug, Default)]
pub struct DefaultRetryCondition;

impl RetryCondition for DefaultRetryCondition {
    fn should_retry(&self, error: &Error) -> bool {
        match error.status() {
            None => true,
            Some(status) => status.as_u16() >= 500 || status.as_u16() == 408,
        }
    }
}

/// How many extra attempts to make and how long to wait between them.
///
/// The delay before the retry after attempt *i* (0-indexed) is
/// `retry_delay * 2^i`, capped by `max_delay` when one is set. With
/// `jitter_ratio` at its default of 0 the schedule is exact.
#[derive(Clone)]
pub struct RetryPolicy {
    retries: usize,
    retry_delay: Duration,
    max_delay: Option<Duration>,
    jitter_ratio: f64,
    condition: Option<Arc<dyn RetryCondition>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("custom_condition", &self.condition.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// A single attempt, no delays.
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_secs(1),
            max_delay: None,
            jitter_ratio: 0.0,
            condition: None,
        }
    }

    /// Three extra attempts starting at one second, capped at ten.
    pub fn standard() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(10)),
            jitter_ratio: 0.0,
            condition: None,
        }
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub(crate) fn retries_value(&self) -> usize {
        self.retries
    }

    /// Attempts including the first try.
    pub(crate) fn total_attempts(&self) -> usize {
        self.retries + 1
    }

    pub(crate) fn should_retry(&self, error: &Error) -> bool {
        match &self.condition {
            Some(condition) => condition.should_retry(error),
            None => DefaultRetryCondition.should_retry(error),
        }
    }

    /// Backoff before the retry that follows attempt `attempt` (0-indexed).
    pub(crate) fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(31) as u32;
        let multiplier = 1_u128 << exponent;
        let mut delay_ms = self.retry_delay.as_millis().saturating_mul(multiplier);
        if let Some(max_delay) = self.max_delay {
            delay_ms = delay_ms.min(max_delay.as_millis());
        }
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as u128) as u64);
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let mut sampled_ms = rng.random_range(low..=high);
        if let Some(max_delay) = self.max_delay {
            sampled_ms = sampled_ms.min(max_delay.as_millis().min(u64::MAX as u128) as u64);
        }
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Drives an operation through the policy: attempt, consult the predicate on
/// failure, sleep the backoff, and go again. The final unrecoverable error
/// is returned unchanged. Attempts are strictly sequential.
pub(crate) async fn run_with_policy<T, F, R>(
    policy: &RetryPolicy,
    mut operation: F,
    on_retry: R,
) -> Result<T, Error>
where
    F: FnMut(usize) -> BoxFuture<'static, Result<T, Error>>,
    R: Fn(usize, &Error, Duration),
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.retries_value() || !policy.should_retry(&error) {
                    return Err(error);
                }
                let delay = policy.backoff_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.total_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request"
                );
                on_retry(attempt, &error, delay);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::FutureExt;

    use super::{DefaultRetryCondition, RetryCondition, RetryPolicy, run_with_policy};
    use crate::config::{ClientDefaults, RequestConfig, merge};
    use crate::error::Error;
    use crate::transport::TransportErrorKind;

    fn network_error() -> Error {
        let resolved = merge(
            &ClientDefaults::new(String::new()),
            &RequestConfig::new("/test"),
        );
        Error::Network {
            kind: TransportErrorKind::Read,
            message: "connection reset".to_owned(),
            code: None,
            request: Box::new(resolved),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::disabled().retry_delay(Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_respects_the_cap() {
        let policy = RetryPolicy::disabled()
            .retry_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250));
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(250));
        assert_eq!(policy.backoff_for_attempt(9), Duration::from_millis(250));
    }

    #[test]
    fn jittered_backoff_never_exceeds_the_cap() {
        let policy = RetryPolicy::disabled()
            .retry_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(120))
            .jitter_ratio(1.0);
        for _ in 0..256 {
            assert!(policy.backoff_for_attempt(3) <= Duration::from_millis(120));
        }
    }

    #[test]
    fn default_condition_retries_statusless_and_server_errors() {
        let condition = DefaultRetryCondition;
        assert!(condition.should_retry(&network_error()));

        let resolved = merge(
            &ClientDefaults::new(String::new()),
            &RequestConfig::new("/test"),
        );
        let http = |status: u16| Error::Http {
            status,
            message: String::new(),
            request: Box::new(resolved.clone()),
            response: Box::new(crate::response::ResponseEnvelope::from_raw(
                crate::transport::RawResponse {
                    status,
                    headers: http::HeaderMap::new(),
                    body: bytes::Bytes::new(),
                    cookies: Vec::new(),
                },
                crate::config::ResponseKind::Json,
            )),
        };
        assert!(condition.should_retry(&http(500)));
        assert!(condition.should_retry(&http(503)));
        assert!(condition.should_retry(&http(408)));
        assert!(!condition.should_retry(&http(404)));
        assert!(!condition.should_retry(&http(429)));
    }

    #[tokio::test]
    async fn zero_retries_means_exactly_one_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), Error> = run_with_policy(
            &RetryPolicy::disabled(),
            move |_attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error()) }.boxed()
            },
            |_, _, _| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failures_use_all_attempts_then_propagate() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy::disabled()
            .retries(2)
            .retry_delay(Duration::from_millis(100));
        let result: Result<(), Error> = run_with_policy(
            &policy,
            move |_attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error()) }.boxed()
            },
            |_, _, _| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejecting_condition_stops_after_the_first_attempt() {
        struct NeverRetry;
        impl RetryCondition for NeverRetry {
            fn should_retry(&self, _error: &Error) -> bool {
                false
            }
        }

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy::disabled()
            .retries(5)
            .condition(Arc::new(NeverRetry));
        let result: Result<(), Error> = run_with_policy(
            &policy,
            move |_attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error()) }.boxed()
            },
            |_, _, _| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_mid_schedule_returns_the_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy::disabled()
            .retries(3)
            .retry_delay(Duration::from_millis(50));
        let result = run_with_policy(
            &policy,
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(network_error())
                    } else {
                        Ok(attempt)
                    }
                }
                .boxed()
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
