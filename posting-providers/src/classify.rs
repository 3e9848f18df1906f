//! Retryable vs. terminal classification of provider failures.
//!
//! Terminal failures (banned accounts, restricted communities, dead threads)
//! must never be retried by callers, even when the transport would retry a
//! transient error on the same call.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Terminal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

const TERMINAL_CODES: &[&str] = &[
    "BANNED",
    "ACCOUNT_BANNED",
    "ACCOUNT_SUSPENDED",
    "SUBREDDIT_RESTRICTED",
    "SUBREDDIT_BANNED",
    "INVALID_THREAD",
    "THREAD_LOCKED",
    "THREAD_ARCHIVED",
    "THREAD_NOT_FOUND",
];

/// Phrases that identify a terminal failure when no code was supplied.
const TERMINAL_PHRASES: &[&str] = &[
    "account banned",
    "account suspended",
    "account has been suspended",
    "banned from",
    "thread is locked",
    "thread is archived",
];

pub fn classify_error_code(code: &str) -> FailureClass {
    let normalized = code.trim().to_ascii_uppercase();
    if TERMINAL_CODES.contains(&normalized.as_str()) {
        FailureClass::Terminal
    } else {
        FailureClass::Transient
    }
}

/// Returns whether a failure may be retried.
pub fn classify_failure(code: Option<&str>, message: &str) -> bool {
    if let Some(code) = code {
        if classify_error_code(code) == FailureClass::Terminal {
            return false;
        }
    }

    let message = message.to_ascii_lowercase();
    !TERMINAL_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_is_terminal() {
        assert_eq!(classify_error_code("BANNED"), FailureClass::Terminal);
        assert!(!classify_failure(Some("BANNED"), "Account banned"));
    }

    #[test]
    fn test_codes_are_case_insensitive() {
        assert_eq!(
            classify_error_code(" subreddit_restricted "),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_network_failure_is_retryable() {
        assert!(classify_failure(None, "Network error: connection reset by peer"));
        assert!(classify_failure(Some("INTERNAL_ERROR"), "upstream exploded"));
        assert_eq!(classify_error_code("RATE_LIMITED"), FailureClass::Transient);
    }

    #[test]
    fn test_terminal_phrase_without_code() {
        assert!(!classify_failure(None, "This account has been suspended"));
        assert!(!classify_failure(None, "You are banned from r/rust"));
    }
}
