use crate::classify::classify_failure;
use crate::provider::{Capabilities, PostingProvider};
use async_trait::async_trait;
use serde::Deserialize;
use threadcraft_core::{
    CommentStatus, ConfigError, CoreError, PostCommentRequest, PostCommentResult,
    ProviderSettings, ENV_PROVIDER_API_KEY,
};
use tracing::{info, warn};
use transport::{HttpRequest, RateLimitConfig, RetryConfig, RetryingTransport, TransportOptions};
use url::Url;

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[serde(default)]
    success: bool,
    comment_id: Option<String>,
    comment_url: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_code: Option<String>,
}

impl ErrorBody {
    /// Message and code of a non-2xx rejection, falling back to the raw body.
    fn describe(message: &str, status_code: Option<u16>) -> (String, Option<String>) {
        let body: ErrorBody = serde_json::from_str(message).unwrap_or_default();
        let text = body.error.unwrap_or_else(|| match status_code {
            Some(status) => format!("HTTP {}: {}", status, message),
            None => message.to_string(),
        });
        (text, body.error_code)
    }
}

/// Terminal rejections stop the transport's retry loop on the first attempt.
fn retry_unless_terminal(error: &CoreError) -> bool {
    match error {
        CoreError::RequestFailed {
            message,
            status_code,
        } => {
            let (text, code) = ErrorBody::describe(message, *status_code);
            classify_failure(code.as_deref(), &text)
        }
        _ => true,
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    exists: bool,
    score: Option<i64>,
    removed: Option<bool>,
    reply_count: Option<u32>,
}

/// Posting backend reached over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpPostingProvider {
    name: String,
    base_url: Url,
    api_key: Option<String>,
    transport: RetryingTransport,
}

impl HttpPostingProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        transport: RetryingTransport,
    ) -> Result<Self, CoreError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            field: "provider.base_url".to_string(),
            value: format!("{} ({})", base_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "provider.base_url".to_string(),
                value: base_url.to_string(),
            }
            .into());
        }

        Ok(Self {
            name: name.into(),
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            transport,
        })
    }

    pub fn from_settings(
        settings: &ProviderSettings,
        transport: RetryingTransport,
    ) -> Result<Self, CoreError> {
        Self::new(
            settings.name.clone(),
            &settings.base_url,
            settings.api_key.clone(),
            transport,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    fn api_key(&self) -> Result<&str, CoreError> {
        self.api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingEnvironmentVariable {
                var_name: ENV_PROVIDER_API_KEY.to_string(),
            }
            .into()
        })
    }

    fn failed(&self, message: String, error_code: Option<String>) -> PostCommentResult {
        let retryable = classify_failure(error_code.as_deref(), &message);
        warn!(
            "Provider {} failed to post ({}): {}",
            self.name,
            if retryable { "retryable" } else { "terminal" },
            message
        );
        PostCommentResult::failed(message, error_code, retryable)
    }
}

#[async_trait]
impl PostingProvider for HttpPostingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn ensure_configured(&self) -> Result<(), CoreError> {
        self.api_key().map(|_| ())
    }

    async fn post_comment(
        &self,
        request: &PostCommentRequest,
    ) -> Result<PostCommentResult, CoreError> {
        let api_key = self.api_key()?;
        let http_request =
            HttpRequest::post_json(self.endpoint(&["comments"]), serde_json::to_value(request)?)
                .bearer_auth(api_key);
        let options = TransportOptions::new(RetryConfig::posting())
            .with_rate_limit(RateLimitConfig::posting(&self.name))
            .with_retry_predicate(retry_unless_terminal);

        match self
            .transport
            .request_json::<PostResponse>(&http_request, &options)
            .await
        {
            Ok(PostResponse {
                success: true,
                comment_id: Some(comment_id),
                comment_url,
                ..
            }) => {
                info!("Posted comment {} via {}", comment_id, self.name);
                Ok(PostCommentResult::posted(comment_id, comment_url))
            }
            Ok(response) if response.success => Ok(self.failed(
                "provider reported success without a comment id".to_string(),
                response.error_code,
            )),
            Ok(response) => Ok(self.failed(
                response
                    .error
                    .unwrap_or_else(|| "provider rejected the comment".to_string()),
                response.error_code,
            )),
            Err(e) if e.is_configuration() => Err(e),
            Err(CoreError::RequestFailed {
                message,
                status_code,
            }) => {
                let (text, code) = ErrorBody::describe(&message, status_code);
                Ok(self.failed(text, code))
            }
            Err(e) => Ok(self.failed(e.to_string(), None)),
        }
    }

    async fn check_comment_status(&self, comment_id: &str) -> Result<CommentStatus, CoreError> {
        let api_key = self.api_key()?;
        let http_request =
            HttpRequest::get(self.endpoint(&["comments", comment_id])).bearer_auth(api_key);
        let options = TransportOptions::new(RetryConfig::default())
            .with_rate_limit(RateLimitConfig::status_checks(&self.name));

        match self
            .transport
            .request_json::<StatusResponse>(&http_request, &options)
            .await
        {
            Ok(status) => Ok(CommentStatus {
                exists: status.exists,
                score: status.score.unwrap_or(0),
                removed: status.removed.unwrap_or(false),
                reply_count: status.reply_count.unwrap_or(0),
            }),
            Err(CoreError::RequestFailed {
                status_code: Some(404),
                ..
            }) => Ok(CommentStatus {
                exists: false,
                score: 0,
                removed: false,
                reply_count: 0,
            }),
            Err(e) => Err(e),
        }
    }

    async fn remaining_capacity(&self) -> Result<u32, CoreError> {
        let limit = RateLimitConfig::posting(&self.name);
        self.transport
            .limiter()
            .remaining(&limit.key, limit.max_requests, limit.window)
            .await
    }
}
