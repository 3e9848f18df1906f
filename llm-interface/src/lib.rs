pub mod client;
pub mod openai;
pub mod prompt;
pub mod scorer;

pub use client::{ChatMessage, ChatRequest, ChatResponse, ChatRole, LlmClient, TokenUsage};
pub use openai::OpenAiCompatibleClient;
pub use prompt::{build_scoring_messages, SCORING_SYSTEM_PROMPT};
pub use scorer::{
    parse_scoring_output, strip_code_fences, RelevanceScorer, DEFAULT_SCORING_TEMPERATURE,
};
