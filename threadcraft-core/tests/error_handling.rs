use std::time::Duration;
use threadcraft_core::{
    ConfigError, CoreError, CreditError, DatabaseError, ErrorExt, ErrorReporter, LlmError,
    ProviderError,
};

#[test]
fn test_error_codes() {
    let provider_error = CoreError::Provider(ProviderError::Unsupported {
        provider: "relay".to_string(),
        capability: "status_checks".to_string(),
    });
    assert_eq!(provider_error.error_code(), "PROVIDER");

    let db_error = CoreError::Database(DatabaseError::DatabaseLocked);
    assert_eq!(db_error.error_code(), "DATABASE");

    let llm_error = CoreError::Llm(LlmError::InvalidApiKey {
        provider: "openrouter".to_string(),
    });
    assert_eq!(llm_error.error_code(), "LLM");

    let credit_error = CoreError::Credits(CreditError::Insufficient {
        required: 5,
        available: 2,
    });
    assert_eq!(credit_error.error_code(), "CREDITS");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");
}

#[test]
fn test_taxonomy_retryability() {
    // Configuration errors: never retried.
    let config_error = CoreError::Config(ConfigError::MissingEnvironmentVariable {
        var_name: "THREADCRAFT_LLM_API_KEY".to_string(),
    });
    assert!(!config_error.is_retryable());
    assert!(config_error.is_configuration());

    // Transient transport errors: retried.
    let server_error = CoreError::RequestFailed {
        message: "bad gateway".to_string(),
        status_code: Some(502),
    };
    assert!(server_error.is_retryable());
    let throttled = CoreError::RateLimited {
        message: "slow down".to_string(),
        retry_after: Some(Duration::from_secs(12)),
    };
    assert!(throttled.is_retryable());

    // Missing provider capabilities: never retried.
    let unsupported = CoreError::Provider(ProviderError::Unsupported {
        provider: "relay".to_string(),
        capability: "capacity_reporting".to_string(),
    });
    assert!(!unsupported.is_retryable());

    // A failed refund needs a person, not another attempt.
    let refund = CoreError::Credits(CreditError::RefundFailed {
        user_id: "u1".to_string(),
        amount: 1,
        reason: "credit account u1 not found".to_string(),
    });
    assert!(!refund.is_retryable());

    // Semantic validation errors: retryable by regenerating.
    let malformed = CoreError::Llm(LlmError::InvalidResponseFormat {
        provider: "openrouter".to_string(),
        attempts: 3,
        details: "missing field `postType`".to_string(),
    });
    assert!(malformed.is_retryable());

    // Business-rule errors: never retried automatically.
    let broke = CoreError::Credits(CreditError::Insufficient {
        required: 10,
        available: 3,
    });
    assert!(!broke.is_retryable());
    assert_eq!(broke.retry_after(), None);

    let client_error = CoreError::RequestFailed {
        message: "bad request".to_string(),
        status_code: Some(400),
    };
    assert!(!client_error.is_retryable());
}

#[test]
fn test_retry_after() {
    let throttled = CoreError::RateLimited {
        message: "slow down".to_string(),
        retry_after: Some(Duration::from_secs(60)),
    };
    assert_eq!(throttled.retry_after(), Some(Duration::from_secs(60)));

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(30)));
}

#[test]
fn test_user_friendly_messages() {
    let broke = CoreError::Credits(CreditError::Insufficient {
        required: 10,
        available: 3,
    });
    let message = broke.user_friendly_message();
    assert!(message.contains("10 needed"));
    assert!(message.contains("3 available"));

    let config_error = CoreError::Config(ConfigError::MissingEnvironmentVariable {
        var_name: "THREADCRAFT_PROVIDER_API_KEY".to_string(),
    });
    let message = config_error.user_friendly_message();
    assert!(message.contains("THREADCRAFT_PROVIDER_API_KEY"));
}

#[test]
fn test_error_reporter() {
    let reporter = ErrorReporter::new()
        .with_error_reporting(true)
        .with_warning_reporting(true);
    let error = CoreError::Provider(ProviderError::NoneAvailable);

    // Only checks that reporting does not panic.
    reporter.report_error(&error);
    reporter.report_warning(&error);
}
