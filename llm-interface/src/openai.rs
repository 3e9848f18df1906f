use crate::client::{ChatMessage, ChatRequest, ChatResponse, LlmClient, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use threadcraft_core::{CoreError, LlmError, LlmSettings};
use tracing::debug;
use transport::{HttpRequest, RateLimitConfig, RetryConfig, RetryingTransport, TransportOptions};

/// Suffix that asks OpenRouter-style gateways for web-grounded generation.
const ONLINE_SUFFIX: &str = ":online";

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI schema.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    settings: LlmSettings,
    transport: RetryingTransport,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: LlmSettings, transport: RetryingTransport) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn model_id(&self) -> String {
        let model = self.settings.model.as_str();
        if self.settings.web_search && !model.ends_with(ONLINE_SUFFIX) {
            format!("{}{}", model, ONLINE_SUFFIX)
        } else {
            model.to_string()
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn provider_name(&self) -> &str {
        &self.settings.base_url
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, CoreError> {
        let api_key = self.settings.require_api_key()?;
        let model = self.model_id();
        let body = CompletionBody {
            model: &model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens.or(self.settings.max_tokens),
        };

        let http_request =
            HttpRequest::post_json(self.endpoint(), serde_json::to_value(&body)?).bearer_auth(api_key);
        let options = TransportOptions::new(RetryConfig::llm())
            .with_rate_limit(RateLimitConfig::llm(&self.settings.model));

        let reply: CompletionReply = match self.transport.request_json(&http_request, &options).await {
            Ok(reply) => reply,
            Err(CoreError::RequestFailed {
                status_code: Some(401) | Some(403),
                ..
            }) => {
                return Err(LlmError::InvalidApiKey {
                    provider: self.provider_name().to_string(),
                }
                .into())
            }
            Err(e) => return Err(e),
        };

        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| LlmError::EmptyCompletion {
                provider: self.provider_name().to_string(),
            })?;

        if let Some(usage) = &reply.usage {
            debug!(
                "{} used {} prompt / {} completion tokens",
                model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(ChatResponse {
            content,
            model,
            usage: reply.usage,
        })
    }
}
