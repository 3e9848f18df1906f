use crate::http::{HttpExecutor, HttpRequest};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use threadcraft_core::CoreError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum backoff before jitter (in milliseconds)
    pub max_delay_ms: u64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Posting calls back off slower; providers punish hammering.
    pub fn posting() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            jitter_factor: 0.2,
        }
    }

    pub fn llm() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            jitter_factor: 0.2,
        }
    }
}

/// `base × 2^attempt`, capped at `max_delay_ms`, plus up to
/// `jitter_factor` of random jitter on top.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(32));
    let exponential_ms = config
        .base_delay_ms
        .saturating_mul(multiplier)
        .min(config.max_delay_ms);

    let jitter_range = (exponential_ms as f64 * config.jitter_factor.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range == 0 {
        0
    } else {
        fastrand::u64(0..=jitter_range)
    };

    Duration::from_millis(exponential_ms + jitter)
}

/// Longest wait a `retry-after` header can impose.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Parses a `retry-after` header given in (possibly fractional) seconds,
/// capped at [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(seconds).unwrap_or(MAX_RETRY_AFTER);
    Some(delay.min(MAX_RETRY_AFTER))
}

/// Decides whether a failed attempt may be retried. Returning false stops
/// the loop and surfaces the error at once.
pub type RetryPredicate = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransportOptions {
    pub retry: RetryConfig,
    pub rate_limit: Option<RateLimitConfig>,
    pub should_retry: Option<RetryPredicate>,
}

impl std::fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportOptions")
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl TransportOptions {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            rate_limit: None,
            should_retry: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    fn allows_retry(&self, error: &CoreError) -> bool {
        self.should_retry
            .as_ref()
            .map_or(true, |predicate| predicate(error))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub attempts: u64,
    pub retries: u64,
    pub rate_limited_responses: u64,
    pub failures: u64,
}

/// Single choke point for outbound HTTP: rate limiting before every attempt,
/// 429 handling and bounded exponential backoff.
#[derive(Clone)]
pub struct RetryingTransport {
    executor: Arc<dyn HttpExecutor>,
    limiter: RateLimiter,
    stats: Arc<Mutex<TransportStats>>,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("limiter", &self.limiter)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RetryingTransport {
    pub fn new(executor: Arc<dyn HttpExecutor>, limiter: RateLimiter) -> Self {
        Self {
            executor,
            limiter,
            stats: Arc::new(Mutex::new(TransportStats::default())),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record<F: FnOnce(&mut TransportStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
        options: &TransportOptions,
    ) -> Result<T, CoreError> {
        let body = self.request_text(request, options).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Returns the body of the first 2xx response, or the last error once
    /// `max_retries` additional attempts are exhausted.
    pub async fn request_text(
        &self,
        request: &HttpRequest,
        options: &TransportOptions,
    ) -> Result<String, CoreError> {
        let mut attempt = 0u32;

        loop {
            if let Some(rate_limit) = &options.rate_limit {
                self.limiter
                    .wait_for_admission(&rate_limit.key, rate_limit.max_requests, rate_limit.window)
                    .await?;
            }

            self.record(|s| s.attempts += 1);
            debug!(
                "{} {} (attempt {}/{})",
                request.method,
                request.url,
                attempt + 1,
                options.retry.max_retries + 1
            );

            let (error, delay) = match self.executor.execute(request).await {
                Ok(response) if response.is_success() => {
                    if attempt > 0 {
                        info!(
                            "{} {} succeeded after {} retries",
                            request.method, request.url, attempt
                        );
                    }
                    return Ok(response.body);
                }
                Ok(response) if response.status == 429 => {
                    self.record(|s| s.rate_limited_responses += 1);
                    let retry_after = response.header("retry-after").and_then(parse_retry_after);
                    let delay = retry_after.unwrap_or_else(|| calculate_delay(attempt, &options.retry));
                    (
                        CoreError::RateLimited {
                            message: format!("{} {} returned 429", request.method, request.url),
                            retry_after,
                        },
                        delay,
                    )
                }
                Ok(response) => (
                    CoreError::RequestFailed {
                        message: response.body,
                        status_code: Some(response.status),
                    },
                    calculate_delay(attempt, &options.retry),
                ),
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => (e, calculate_delay(attempt, &options.retry)),
            };

            if !options.allows_retry(&error) {
                self.record(|s| s.failures += 1);
                info!(
                    "{} {} failed terminally on attempt {}: {}",
                    request.method,
                    request.url,
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            if attempt >= options.retry.max_retries {
                self.record(|s| s.failures += 1);
                error!(
                    "{} {} failed after {} attempts: {}",
                    request.method,
                    request.url,
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            warn!(
                "Retrying {} {} in {:?} due to: {}",
                request.method, request.url, delay, error
            );
            self.record(|s| s.retries += 1);
            sleep(delay).await;
            attempt += 1;
        }
    }
}
