//! Application configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! `THREADCRAFT_*` environment variables. Credentials are optional at load
//! time; components ask for them at first use through the `require_*`
//! accessors, which report a [`ConfigError`] naming the variable to set.

use crate::error::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use url::Url;

pub const ENV_PROVIDER_NAME: &str = "THREADCRAFT_PROVIDER_NAME";
pub const ENV_PROVIDER_BASE_URL: &str = "THREADCRAFT_PROVIDER_BASE_URL";
pub const ENV_PROVIDER_API_KEY: &str = "THREADCRAFT_PROVIDER_API_KEY";
pub const ENV_LLM_API_KEY: &str = "THREADCRAFT_LLM_API_KEY";
pub const ENV_LLM_BASE_URL: &str = "THREADCRAFT_LLM_BASE_URL";
pub const ENV_LLM_MODEL: &str = "THREADCRAFT_LLM_MODEL";
pub const ENV_DATABASE_URL: &str = "THREADCRAFT_DATABASE_URL";
pub const ENV_RATE_LIMIT_STORE_URL: &str = "THREADCRAFT_RATE_LIMIT_STORE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            base_url: "http://localhost:8787/v1".to_string(),
            api_key: None,
        }
    }
}

impl ProviderSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        require(self.api_key.as_deref(), ENV_PROVIDER_API_KEY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub web_search: bool,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            web_search: false,
            temperature: 0.2,
            max_tokens: Some(500),
        }
    }
}

impl LlmSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        require(self.api_key.as_deref(), ENV_LLM_API_KEY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub relevance_threshold: f64,
    pub credits_per_post: i64,
    pub scoring_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            credits_per_post: 1,
            scoring_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderSettings,
    pub llm: LlmSettings,
    pub database_url: String,
    /// `memory` for a process-local window, otherwise a SQLite URL shared
    /// between workers.
    pub rate_limit_store_url: String,
    pub pipeline: PipelineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            llm: LlmSettings::default(),
            database_url: "sqlite://threadcraft.db".to_string(),
            rate_limit_store_url: "memory".to_string(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads the optional TOML file, applies environment overrides and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        debug!(
            "Loaded configuration (provider: {}, model: {})",
            config.provider.name, config.llm.model
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(ENV_PROVIDER_NAME) {
            self.provider.name = value;
        }
        if let Some(value) = lookup(ENV_PROVIDER_BASE_URL) {
            self.provider.base_url = value;
        }
        if let Some(value) = lookup(ENV_PROVIDER_API_KEY) {
            self.provider.api_key = Some(value);
        }
        if let Some(value) = lookup(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(value);
        }
        if let Some(value) = lookup(ENV_LLM_BASE_URL) {
            self.llm.base_url = value;
        }
        if let Some(value) = lookup(ENV_LLM_MODEL) {
            self.llm.model = value;
        }
        if let Some(value) = lookup(ENV_DATABASE_URL) {
            self.database_url = value;
        }
        if let Some(value) = lookup(ENV_RATE_LIMIT_STORE_URL) {
            self.rate_limit_store_url = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("provider.base_url", &self.provider.base_url)?;
        check_url("llm.base_url", &self.llm.base_url)?;

        if self.provider.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "provider.name".to_string(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".to_string(),
            });
        }

        let temperature = self.llm.temperature;
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("llm.temperature", temperature));
        }

        let threshold = self.pipeline.relevance_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid("pipeline.relevance_threshold", threshold));
        }
        if self.pipeline.credits_per_post <= 0 {
            return Err(invalid(
                "pipeline.credits_per_post",
                self.pipeline.credits_per_post,
            ));
        }
        if self.pipeline.scoring_concurrency == 0 {
            return Err(invalid("pipeline.scoring_concurrency", 0));
        }
        Ok(())
    }
}

fn require<'a>(value: Option<&'a str>, var_name: &str) -> Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
            var_name: var_name.to_string(),
        })
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|_| invalid(field, value))
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit_store_url, "memory");
        assert_eq!(config.pipeline.scoring_concurrency, 4);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let raw = r#"
            database_url = "sqlite:///tmp/tc.db"

            [provider]
            name = "relay"
            base_url = "https://relay.example.com/v1"

            [pipeline]
            relevance_threshold = 0.85
        "#;

        let config = AppConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.provider.name, "relay");
        assert_eq!(config.database_url, "sqlite:///tmp/tc.db");
        assert_eq!(config.pipeline.relevance_threshold, 0.85);
        assert_eq!(config.pipeline.credits_per_post, 1);
        assert_eq!(config.llm.model, LlmSettings::default().model);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_PROVIDER_API_KEY, "pk-123"),
            (ENV_LLM_API_KEY, "sk-456"),
            (ENV_LLM_MODEL, "anthropic/claude-3.5-haiku"),
            (ENV_DATABASE_URL, "   "),
        ]);

        let mut config = AppConfig::default();
        config.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.provider.require_api_key().unwrap(), "pk-123");
        assert_eq!(config.llm.require_api_key().unwrap(), "sk-456");
        assert_eq!(config.llm.model, "anthropic/claude-3.5-haiku");
        assert_eq!(config.database_url, "sqlite://threadcraft.db");
    }

    #[test]
    fn test_missing_credentials_name_the_variable() {
        let config = AppConfig::default();
        match config.llm.require_api_key() {
            Err(ConfigError::MissingEnvironmentVariable { var_name }) => {
                assert_eq!(var_name, ENV_LLM_API_KEY);
            }
            other => panic!("expected missing env var, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.pipeline.relevance_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.provider.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.llm.temperature = 3.5;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "llm.temperature"),
            other => panic!("expected invalid temperature, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
