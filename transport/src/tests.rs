#[cfg(test)]
mod tests {
    use crate::http::{HttpExecutor, HttpRequest, HttpResponse};
    use crate::rate_limiter::{RateLimitConfig, RateLimiter};
    use crate::retry::{RetryConfig, RetryingTransport, TransportOptions, MAX_RETRY_AFTER};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use threadcraft_core::{ConfigError, CoreError};
    use tokio::time::Instant;

    /// Replays canned outcomes in order and counts calls.
    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<Result<HttpResponse, CoreError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<Result<HttpResponse, CoreError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpExecutor for ScriptedExecutor {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, CoreError> {
            self.calls.lock().unwrap().push(request.url.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
        }
    }

    fn transport(executor: Arc<ScriptedExecutor>) -> RetryingTransport {
        RetryingTransport::new(executor, RateLimiter::in_memory())
    }

    fn fast_retry(max_retries: u32) -> TransportOptions {
        TransportOptions::new(RetryConfig {
            max_retries,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter_factor: 0.0,
        })
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        ok: bool,
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let executor = ScriptedExecutor::new(vec![Ok(HttpResponse::new(200, r#"{"ok":true}"#))]);
        let transport = transport(executor.clone());

        let echo: Echo = transport
            .request_json(&HttpRequest::get("https://api.test/echo"), &fast_retry(3))
            .await
            .unwrap();

        assert_eq!(echo, Echo { ok: true });
        assert_eq!(executor.call_count(), 1);
        assert_eq!(transport.stats().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_with_backoff() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(502, "bad gateway")),
            Ok(HttpResponse::new(503, "unavailable")),
            Ok(HttpResponse::new(200, r#"{"ok":true}"#)),
        ]);
        let transport = transport(executor.clone());

        let started = Instant::now();
        let body = transport
            .request_text(&HttpRequest::get("https://api.test/flaky"), &fast_retry(3))
            .await
            .unwrap();

        assert_eq!(body, r#"{"ok":true}"#);
        assert_eq!(executor.call_count(), 3);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(transport.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_honors_retry_after_header() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(429, "slow down").with_header("Retry-After", "7")),
            Ok(HttpResponse::new(200, "done")),
        ]);
        let transport = transport(executor.clone());

        let started = Instant::now();
        let body = transport
            .request_text(&HttpRequest::get("https://api.test/busy"), &fast_retry(3))
            .await
            .unwrap();

        assert_eq!(body, "done");
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(transport.stats().rate_limited_responses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absurd_retry_after_waits_the_capped_delay() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(429, "slow down").with_header("Retry-After", "1e30")),
            Ok(HttpResponse::new(200, "done")),
        ]);
        let transport = transport(executor.clone());

        let started = Instant::now();
        let body = transport
            .request_text(&HttpRequest::get("https://api.test/busy"), &fast_retry(3))
            .await
            .unwrap();

        assert_eq!(body, "done");
        assert!(started.elapsed() >= MAX_RETRY_AFTER);
        assert!(started.elapsed() < MAX_RETRY_AFTER + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_shares_the_retry_budget() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(429, "slow down")),
            Ok(HttpResponse::new(500, "boom")),
            Ok(HttpResponse::new(429, "slow down")),
        ]);
        let transport = transport(executor.clone());

        let result = transport
            .request_text(&HttpRequest::get("https://api.test/busy"), &fast_retry(2))
            .await;

        assert!(matches!(result, Err(CoreError::RateLimited { .. })));
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_error() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(500, "first")),
            Ok(HttpResponse::new(500, "second")),
            Ok(HttpResponse::new(400, r#"{"error_code":"INVALID_THREAD"}"#)),
        ]);
        let transport = transport(executor.clone());

        let result = transport
            .request_text(
                &HttpRequest::post_json("https://api.test/comments", json!({"x": 1})),
                &fast_retry(2),
            )
            .await;

        match result {
            Err(CoreError::RequestFailed {
                message,
                status_code,
            }) => {
                assert_eq!(status_code, Some(400));
                assert!(message.contains("INVALID_THREAD"));
            }
            other => panic!("expected request failure, got {:?}", other),
        }
        assert_eq!(executor.call_count(), 3);
        assert_eq!(transport.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_predicate_stops_on_terminal_errors() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(503, "unavailable")),
            Ok(HttpResponse::new(403, "account banned")),
            Ok(HttpResponse::new(200, "never reached")),
        ]);
        let transport = transport(executor.clone());
        let options = fast_retry(3).with_retry_predicate(|error| {
            !matches!(error, CoreError::RequestFailed { status_code: Some(403), .. })
        });

        let result = transport
            .request_text(&HttpRequest::get("https://api.test/post"), &options)
            .await;

        assert!(matches!(
            result,
            Err(CoreError::RequestFailed {
                status_code: Some(403),
                ..
            })
        ));
        assert_eq!(executor.call_count(), 2);
        assert_eq!(transport.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried() {
        let executor = ScriptedExecutor::new(vec![
            Err(CoreError::Timeout { seconds: 30 }),
            Ok(HttpResponse::new(200, "recovered")),
        ]);
        let transport = transport(executor.clone());

        let body = transport
            .request_text(&HttpRequest::get("https://api.test/slow"), &fast_retry(1))
            .await
            .unwrap();
        assert_eq!(body, "recovered");
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_errors_are_not_retried() {
        let executor = ScriptedExecutor::new(vec![Err(CoreError::Config(
            ConfigError::MissingEnvironmentVariable {
                var_name: "THREADCRAFT_PROVIDER_API_KEY".to_string(),
            },
        ))]);
        let transport = transport(executor.clone());

        let result = transport
            .request_text(&HttpRequest::get("https://api.test/x"), &fast_retry(3))
            .await;

        assert!(matches!(result, Err(CoreError::Config(_))));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_consulted_before_each_attempt() {
        let executor = ScriptedExecutor::new(vec![
            Ok(HttpResponse::new(200, "a")),
            Ok(HttpResponse::new(200, "b")),
            Ok(HttpResponse::new(200, "c")),
        ]);
        let transport = transport(executor.clone());
        let limit = RateLimitConfig::new("test:window", 10, Duration::from_secs(60));
        let options = fast_retry(0).with_rate_limit(limit.clone());

        for _ in 0..3 {
            transport
                .request_text(&HttpRequest::get("https://api.test/limited"), &options)
                .await
                .unwrap();
        }

        let remaining = transport
            .limiter()
            .remaining(&limit.key, limit.max_requests, limit.window)
            .await
            .unwrap();
        assert_eq!(remaining, 7);
    }

    #[test]
    fn test_limiter_from_blocking_code() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        let first = tokio_test::block_on(limiter.check_admission("sync", 1, window));
        assert!(first.unwrap().allowed);
        let second = tokio_test::block_on(limiter.check_admission("sync", 1, window));
        assert!(!second.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_success_body_is_a_serialization_error() {
        let executor = ScriptedExecutor::new(vec![Ok(HttpResponse::new(200, "not json"))]);
        let transport = transport(executor);

        let result: Result<Echo, CoreError> = transport
            .request_json(&HttpRequest::get("https://api.test/echo"), &fast_retry(0))
            .await;
        assert!(matches!(result, Err(CoreError::Serialization(_))));
    }
}
