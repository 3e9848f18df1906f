pub mod pipeline;
pub mod tracker;

pub use pipeline::{Opportunity, Pipeline, ProcessOutcome};
pub use tracker::{
    first_check_delay, next_check_delay, summarize, CheckOutcome, CommentHealth,
    PerformanceSummary, PerformanceTracker, TRACKING_SCHEDULE,
};
