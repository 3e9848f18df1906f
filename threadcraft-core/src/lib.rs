pub mod concurrency;
pub mod config;
pub mod error;
pub mod error_utils;
pub mod types;

pub use concurrency::*;
pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use types::*;
