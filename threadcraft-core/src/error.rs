use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Credit error: {0}")]
    Credits(#[from] CreditError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("Request failed: {message}")]
    RequestFailed {
        message: String,
        status_code: Option<u16>,
    },
}

impl CoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        CoreError::NotFound {
            resource: resource.into(),
        }
    }

    /// True for missing credentials and other configuration problems.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CoreError::Config(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider {provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: String,
    },

    #[error("No posting provider is available")]
    NoneAvailable,

    #[error("Invalid provider response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Migration failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Database locked")]
    DatabaseLocked,

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key invalid or missing for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Completion from {provider} contained no choices")]
    EmptyCompletion { provider: String },

    #[error("Invalid response format from {provider} after {attempts} attempts: {details}")]
    InvalidResponseFormat {
        provider: String,
        attempts: u32,
        details: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    #[error("Insufficient credits: {required} required, {available} available")]
    Insufficient { required: i64, available: i64 },

    #[error("Refund of {amount} credits to {user_id} failed: {reason}")]
    RefundFailed {
        user_id: String,
        amount: i64,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<sqlx::Error> for CoreError {
    fn from(error: sqlx::Error) -> Self {
        CoreError::Database(DatabaseError::Sql(error))
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        CoreError::Database(DatabaseError::MigrationFailed {
            migration: error.to_string(),
        })
    }
}
