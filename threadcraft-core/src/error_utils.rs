use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

/// Retry classification and presentation shared by every error layer.
pub trait ErrorExt: std::fmt::Display {
    /// Label used in log lines.
    const KIND: &'static str;

    fn log_error(&self) -> &Self {
        error!("{}: {}", Self::KIND, self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("{} (warning): {}", Self::KIND, self);
        self
    }

    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    const KIND: &'static str = "CoreError";

    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Provider(e) => {
                error!("Provider error details: {:?}", e);
            }
            CoreError::Database(e) => {
                error!("Database error details: {:?}", e);
            }
            CoreError::Llm(e) => {
                error!("LLM error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Provider(e) => e.is_retryable(),
            CoreError::Database(e) => e.is_retryable(),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Credits(e) => e.is_retryable(),
            CoreError::Config(e) => e.is_retryable(),
            CoreError::Network(_) => true,
            CoreError::Timeout { .. } => true,
            CoreError::RateLimited { .. } => true,
            CoreError::RequestFailed { status_code, .. } => {
                matches!(status_code, Some(408) | Some(429) | Some(500..=599) | None)
            }
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Timeout { seconds } => Some(Duration::from_secs(*seconds)),
            CoreError::RateLimited { retry_after, .. } => *retry_after,
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Provider(e) => e.user_friendly_message(),
            CoreError::Database(e) => e.user_friendly_message(),
            CoreError::Llm(e) => e.user_friendly_message(),
            CoreError::Credits(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { .. } => {
                "Invalid input provided. Please check your input and try again.".to_string()
            }
            CoreError::Timeout { .. } => {
                "The operation took too long to complete. Please try again.".to_string()
            }
            CoreError::NotFound { resource } => format!("Could not find: {}", resource),
            CoreError::RateLimited { message, .. } => {
                format!(
                    "Rate limited: {}. Please wait before trying again.",
                    message
                )
            }
            CoreError::RequestFailed { message, .. } => {
                format!("Request failed: {}", message)
            }
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Provider(_) => "PROVIDER".to_string(),
            CoreError::Database(_) => "DATABASE".to_string(),
            CoreError::Llm(_) => "LLM".to_string(),
            CoreError::Credits(_) => "CREDITS".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Timeout { .. } => "TIMEOUT".to_string(),
            CoreError::NotFound { .. } => "NOT_FOUND".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
            CoreError::RateLimited { .. } => "RATE_LIMITED".to_string(),
            CoreError::RequestFailed { .. } => "REQUEST_FAILED".to_string(),
        }
    }
}

impl ErrorExt for ProviderError {
    const KIND: &'static str = "ProviderError";

    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::InvalidResponse { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        if self.is_retryable() {
            Some(Duration::from_secs(30))
        } else {
            None
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ProviderError::Unsupported { provider, capability } => {
                format!("{} does not support {}.", provider, capability)
            }
            ProviderError::NoneAvailable => {
                "No posting provider is configured. Please add provider credentials.".to_string()
            }
            ProviderError::InvalidResponse { .. } => {
                "The posting provider returned an unexpected response. Please try again later."
                    .to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ProviderError::Unsupported { .. } => "PROVIDER_UNSUPPORTED".to_string(),
            ProviderError::NoneAvailable => "PROVIDER_NONE_AVAILABLE".to_string(),
            ProviderError::InvalidResponse { .. } => "PROVIDER_INVALID_RESPONSE".to_string(),
        }
    }
}

impl ErrorExt for DatabaseError {
    const KIND: &'static str = "DatabaseError";

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::DatabaseLocked
                | DatabaseError::ConnectionFailed { .. }
                | DatabaseError::TransactionFailed { .. }
                | DatabaseError::Sql(sqlx::Error::PoolTimedOut)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DatabaseError::DatabaseLocked => Some(Duration::from_millis(100)),
            _ if self.is_retryable() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { .. } => {
                "Database connection failed. Please try again.".to_string()
            }
            DatabaseError::DatabaseLocked => {
                "Database is temporarily busy. Please try again.".to_string()
            }
            _ => "Database error occurred. Please try again.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED".to_string(),
            DatabaseError::MigrationFailed { .. } => "DB_MIGRATION_FAILED".to_string(),
            DatabaseError::TransactionFailed { .. } => "DB_TRANSACTION_FAILED".to_string(),
            DatabaseError::DatabaseLocked => "DB_LOCKED".to_string(),
            DatabaseError::Sql(_) => "DB_SQL_ERROR".to_string(),
        }
    }
}

impl ErrorExt for LlmError {
    const KIND: &'static str = "LlmError";

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::EmptyCompletion { .. } | LlmError::InvalidResponseFormat { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        if self.is_retryable() {
            Some(Duration::from_secs(10))
        } else {
            None
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LlmError::InvalidApiKey { provider } => format!(
                "Invalid API key for {}. Please update your credentials.",
                provider
            ),
            LlmError::InvalidResponseFormat { .. } | LlmError::EmptyCompletion { .. } => {
                "The AI service returned an unusable answer. Please try again later.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            LlmError::InvalidApiKey { .. } => "LLM_INVALID_API_KEY".to_string(),
            LlmError::EmptyCompletion { .. } => "LLM_EMPTY_COMPLETION".to_string(),
            LlmError::InvalidResponseFormat { .. } => "LLM_INVALID_RESPONSE".to_string(),
        }
    }
}

impl ErrorExt for CreditError {
    const KIND: &'static str = "CreditError";

    // Resolving a shortfall needs a new grant, never a retry.
    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CreditError::Insufficient {
                required,
                available,
            } => format!(
                "Not enough credits: {} needed but only {} available.",
                required, available
            ),
            CreditError::RefundFailed { amount, .. } => format!(
                "{} credits were charged for a comment that was not posted and could not be returned automatically.",
                amount
            ),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CreditError::Insufficient { .. } => "CREDITS_INSUFFICIENT".to_string(),
            CreditError::RefundFailed { .. } => "CREDITS_REFUND_FAILED".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    const KIND: &'static str = "ConfigError";

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => format!("No configuration file at {}.", path),
            ConfigError::MissingField { field } => format!("Set `{}` in the configuration.", field),
            ConfigError::InvalidValue { field, value } => {
                format!("`{}` cannot be {}.", field, value)
            }
            ConfigError::MissingEnvironmentVariable { var_name } => {
                format!("Export {} before running this command.", var_name)
            }
            ConfigError::Parse(e) => format!("The configuration file is not valid TOML: {}", e),
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

pub struct ErrorReporter {
    report_errors: bool,
    report_warnings: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            report_errors: true,
            report_warnings: true,
        }
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    pub fn with_warning_reporting(mut self, enabled: bool) -> Self {
        self.report_warnings = enabled;
        self
    }

    pub fn report_error(&self, error: &CoreError) {
        if !self.report_errors {
            return;
        }
        error.log_error();
        info!(
            code = %error.error_code(),
            retryable = error.is_retryable(),
            retry_after = ?error.retry_after(),
            "{}",
            error.user_friendly_message()
        );
    }

    pub fn report_warning(&self, error: &CoreError) {
        if self.report_warnings {
            warn!(code = %error.error_code(), "{}", error);
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
