use crate::window_store::{MemoryWindowStore, WindowStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use threadcraft_core::CoreError;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Extra wait added on top of `reset_ms` so the retry lands after expiry.
const WAIT_BUFFER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub key: String,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(key: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            key: key.into(),
            max_requests,
            window,
        }
    }

    /// Organic posting cadence for one provider account: a handful of
    /// comments per ten minutes, far below any API throughput limit.
    pub fn posting(provider: &str) -> Self {
        Self::new(format!("provider:{}:post", provider), 5, Duration::from_secs(600))
    }

    pub fn status_checks(provider: &str) -> Self {
        Self::new(format!("provider:{}:status", provider), 30, Duration::from_secs(60))
    }

    pub fn llm(model: &str) -> Self {
        Self::new(format!("llm:{}", model), 60, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Milliseconds until the oldest live token leaves the window.
    pub reset_ms: u64,
}

/// Sliding-window admission control over a [`WindowStore`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryWindowStore::new()))
    }

    pub async fn check_admission(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<AdmissionDecision, CoreError> {
        self.check_admission_at(key, max_requests, window, now_ms())
            .await
    }

    pub async fn check_admission_at(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<AdmissionDecision, CoreError> {
        self.store
            .admit(key, max_requests, window.as_millis() as i64, now_ms)
            .await
    }

    /// Blocks cooperatively until the key admits a new token.
    pub async fn wait_for_admission(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<AdmissionDecision, CoreError> {
        if max_requests == 0 {
            return Err(CoreError::invalid_input(format!(
                "rate limit for {} admits no requests",
                key
            )));
        }

        let mut waits = 0u32;
        loop {
            let decision = self.check_admission(key, max_requests, window).await?;
            if decision.allowed {
                if waits > 0 {
                    debug!("Admitted {} after {} waits", key, waits);
                }
                return Ok(decision);
            }

            let wait = Duration::from_millis(decision.reset_ms) + WAIT_BUFFER;
            waits += 1;
            if waits == 1 {
                warn!("Rate limit reached for {}, waiting {:?}", key, wait);
            } else {
                debug!("Still rate limited on {}, waiting {:?}", key, wait);
            }
            sleep(wait).await;
        }
    }

    /// Tokens still available in the current window, without consuming one.
    pub async fn remaining(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<u32, CoreError> {
        let (live, _) = self
            .store
            .live_tokens(key, window.as_millis() as i64, now_ms())
            .await?;
        Ok(max_requests.saturating_sub(live))
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_admits_max_then_rejects() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            let decision = limiter.check_admission("burst", 5, window).await.unwrap();
            assert!(decision.allowed);
        }

        let decision = limiter.check_admission("burst", 5, window).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_ms > 0 && decision.reset_ms <= 60_000);
    }

    #[tokio::test]
    async fn test_key_readmits_after_window() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_millis(1_000);
        let t0 = 1_700_000_000_000;

        assert!(limiter.check_admission_at("k", 2, window, t0).await.unwrap().allowed);
        assert!(limiter.check_admission_at("k", 2, window, t0 + 10).await.unwrap().allowed);
        assert!(!limiter.check_admission_at("k", 2, window, t0 + 500).await.unwrap().allowed);

        // First token falls out exactly one window after it was recorded.
        let decision = limiter.check_admission_at("k", 2, window, t0 + 1_000).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        assert!(limiter.check_admission("a", 1, window).await.unwrap().allowed);
        assert!(!limiter.check_admission("a", 1, window).await.unwrap().allowed);
        assert!(limiter.check_admission("b", 1, window).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_wait_for_admission_blocks_until_reset() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_millis(150);

        limiter.wait_for_admission("slow", 1, window).await.unwrap();
        let started = Instant::now();
        let decision = limiter.wait_for_admission("slow", 1, window).await.unwrap();

        assert!(decision.allowed);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_over_admit() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter
                        .check_admission("shared", 7, window)
                        .await
                        .map(|d| d.allowed)
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 7);
    }

    #[tokio::test]
    async fn test_remaining_does_not_consume() {
        let limiter = RateLimiter::in_memory();
        let config = RateLimitConfig::posting("relay");

        assert_eq!(
            limiter
                .remaining(&config.key, config.max_requests, config.window)
                .await
                .unwrap(),
            5
        );
        limiter
            .check_admission(&config.key, config.max_requests, config.window)
            .await
            .unwrap();
        assert_eq!(
            limiter
                .remaining(&config.key, config.max_requests, config.window)
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let limiter = RateLimiter::in_memory();
        let result = limiter
            .wait_for_admission("never", 0, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CoreError::InvalidInput { .. })));
    }
}
