use crate::client::{ChatRequest, LlmClient};
use crate::prompt::build_scoring_messages;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use threadcraft_core::{CoreError, LlmError, PostType, ScoringCandidate, ScoringResult};
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_SCORING_TEMPERATURE: f32 = 0.2;
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct RawScoring {
    relevance: f64,
    reasoning: String,
    #[serde(rename = "postType", alias = "post_type")]
    post_type: String,
}

/// Removes a surrounding ```json fence. Falls back to the outermost braces
/// when the model wraps the object in prose.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        if let Some(body) = rest.trim_end().strip_suffix("```") {
            return body.trim();
        }
    }

    if trimmed.starts_with('{') {
        return trimmed;
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parses and validates model output. The error string describes what was wrong.
pub fn parse_scoring_output(raw: &str) -> Result<ScoringResult, String> {
    let body = strip_code_fences(raw);
    let parsed: RawScoring =
        serde_json::from_str(body).map_err(|e| format!("not a scoring object: {}", e))?;

    if !parsed.relevance.is_finite() || !(0.0..=1.0).contains(&parsed.relevance) {
        return Err(format!("relevance {} outside [0, 1]", parsed.relevance));
    }

    let reasoning = parsed.reasoning.trim();
    if reasoning.is_empty() {
        return Err("reasoning is empty".to_string());
    }

    let post_type = PostType::ALL
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(parsed.post_type.trim()))
        .ok_or_else(|| format!("unknown postType {:?}", parsed.post_type))?;

    Ok(ScoringResult {
        relevance: parsed.relevance,
        reasoning: reasoning.to_string(),
        post_type,
    })
}

/// Scores how naturally a thread fits a business. Malformed model output
/// re-issues the whole generation; transport failures are returned as-is.
#[derive(Clone)]
pub struct RelevanceScorer {
    client: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl RelevanceScorer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            temperature: DEFAULT_SCORING_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub async fn score(&self, candidate: &ScoringCandidate) -> Result<ScoringResult, CoreError> {
        let request = ChatRequest {
            messages: build_scoring_messages(candidate),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut last_problem = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self.client.complete(request.clone()).await?;

            match parse_scoring_output(&response.content) {
                Ok(result) => {
                    debug!(
                        "Scored {} at {:.2} ({}) on attempt {}",
                        candidate.url, result.relevance, result.post_type, attempt
                    );
                    return Ok(result);
                }
                Err(problem) => {
                    warn!(
                        "Invalid scoring output for {} (attempt {}/{}): {}",
                        candidate.url, attempt, MAX_ATTEMPTS, problem
                    );
                    last_problem = problem;
                }
            }

            if attempt < MAX_ATTEMPTS {
                sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
        }

        Err(LlmError::InvalidResponseFormat {
            provider: self.client.provider_name().to_string(),
            attempts: MAX_ATTEMPTS,
            details: last_problem,
        }
        .into())
    }
}
