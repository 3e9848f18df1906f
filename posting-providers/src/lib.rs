pub mod classify;
pub mod http_provider;
pub mod provider;
pub mod registry;

pub use classify::{classify_error_code, classify_failure, FailureClass};
pub use http_provider::HttpPostingProvider;
pub use provider::{Capabilities, Capability, PostingProvider};
pub use registry::ProviderRegistry;
