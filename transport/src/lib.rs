pub mod http;
pub mod rate_limiter;
pub mod retry;
pub mod window_store;

pub use http::{HttpExecutor, HttpRequest, HttpResponse, ReqwestExecutor};
pub use rate_limiter::{AdmissionDecision, RateLimitConfig, RateLimiter};
pub use retry::{
    calculate_delay, parse_retry_after, RetryConfig, RetryPredicate, RetryingTransport,
    TransportOptions, TransportStats, MAX_RETRY_AFTER,
};
pub use window_store::{MemoryWindowStore, WindowStore};

#[cfg(feature = "database")]
pub use window_store::SqliteWindowStore;

#[cfg(test)]
mod tests;
