//! Decaying status checks for posted comments.
//!
//! Checks are dense right after posting, when removals happen, and sparse
//! once a comment has settled. The tracker holds no timers: each check
//! reports the delay until the next one and the caller's scheduler decides
//! whether to come back.

use chrono::{DateTime, Utc};
use database::SnapshotStore;
use posting_providers::{Capability, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use threadcraft_core::{CommentStatus, CoreError, TrackedComment, TrackingSnapshot};
use tracing::{debug, info};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Gap before each check. Cumulative offsets from posting are
/// 1h, 6h, 1d, 3d, 7d, 14d and 30d.
pub const TRACKING_SCHEDULE: [Duration; 7] = [
    Duration::from_secs(HOUR),
    Duration::from_secs(5 * HOUR),
    Duration::from_secs(18 * HOUR),
    Duration::from_secs(2 * DAY),
    Duration::from_secs(4 * DAY),
    Duration::from_secs(7 * DAY),
    Duration::from_secs(16 * DAY),
];

pub fn first_check_delay() -> Duration {
    TRACKING_SCHEDULE[0]
}

/// Delay before check `k`, or `None` once the schedule is exhausted.
pub fn next_check_delay(k: usize) -> Option<Duration> {
    TRACKING_SCHEDULE.get(k).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub snapshot: TrackingSnapshot,
    /// `None` when this was the last scheduled check.
    pub next_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentHealth {
    Active,
    Removed,
    Deleted,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub latest_score: i64,
    pub peak_score: i64,
    pub reply_count: u32,
    pub checks_completed: usize,
    pub health: CommentHealth,
}

pub fn summarize(snapshots: &[TrackingSnapshot]) -> PerformanceSummary {
    let Some(latest) = snapshots.iter().max_by_key(|s| s.check_index) else {
        return PerformanceSummary {
            latest_score: 0,
            peak_score: 0,
            reply_count: 0,
            checks_completed: 0,
            health: CommentHealth::Pending,
        };
    };

    let health = if latest.removed {
        CommentHealth::Removed
    } else if !latest.exists {
        CommentHealth::Deleted
    } else {
        CommentHealth::Active
    };

    PerformanceSummary {
        latest_score: latest.score,
        peak_score: snapshots.iter().map(|s| s.score).max().unwrap_or(latest.score),
        reply_count: latest.reply_count,
        checks_completed: snapshots.len(),
        health,
    }
}

pub struct PerformanceTracker {
    registry: Arc<ProviderRegistry>,
    store: Option<SnapshotStore>,
}

impl PerformanceTracker {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            store: None,
        }
    }

    /// Persists every snapshot taken.
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run_check(
        &self,
        comment: &TrackedComment,
        k: usize,
    ) -> Result<CheckOutcome, CoreError> {
        self.run_check_at(comment, k, Utc::now()).await
    }

    pub async fn run_check_at(
        &self,
        comment: &TrackedComment,
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, CoreError> {
        if k >= TRACKING_SCHEDULE.len() {
            return Err(CoreError::invalid_input(format!(
                "check {} is past the last scheduled check ({})",
                k,
                TRACKING_SCHEDULE.len() - 1
            )));
        }

        let provider = self
            .registry
            .find(&comment.provider_name)
            .ok_or_else(|| CoreError::not_found(format!("provider {}", comment.provider_name)))?;

        let status = if provider.capabilities().supports(Capability::StatusChecks) {
            provider.check_comment_status(&comment.comment_id).await?
        } else {
            debug!(
                "{} cannot report status, assuming {} still exists",
                provider.name(),
                comment.comment_id
            );
            CommentStatus::assumed_present()
        };

        let snapshot = TrackingSnapshot::from_status(k, now, status);
        if let Some(store) = &self.store {
            store.record(comment, &snapshot).await?;
        }

        let next_delay = next_check_delay(k + 1);
        info!(
            "Check {} of {} on {}: score {}, {} replies, exists {}, removed {}",
            k + 1,
            TRACKING_SCHEDULE.len(),
            comment.comment_id,
            snapshot.score,
            snapshot.reply_count,
            snapshot.exists,
            snapshot.removed
        );

        Ok(CheckOutcome {
            snapshot,
            next_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use posting_providers::{Capabilities, PostingProvider};
    use threadcraft_core::{PostCommentRequest, PostCommentResult};

    struct StaticProvider {
        name: &'static str,
        status: Option<CommentStatus>,
    }

    #[async_trait]
    impl PostingProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                status_checks: self.status.is_some(),
                capacity_reporting: false,
            }
        }

        fn ensure_configured(&self) -> Result<(), CoreError> {
            Ok(())
        }

        async fn post_comment(
            &self,
            _request: &PostCommentRequest,
        ) -> Result<PostCommentResult, CoreError> {
            Ok(PostCommentResult::posted("c".to_string(), None))
        }

        async fn check_comment_status(&self, _id: &str) -> Result<CommentStatus, CoreError> {
            self.status
                .ok_or_else(|| CoreError::invalid_input("status checks are not supported"))
        }
    }

    fn tracker() -> PerformanceTracker {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(StaticProvider {
                name: "live",
                status: Some(CommentStatus {
                    exists: true,
                    score: 14,
                    removed: false,
                    reply_count: 3,
                }),
            }))
            .unwrap();
        registry
            .register(Arc::new(StaticProvider {
                name: "blind",
                status: None,
            }))
            .unwrap();
        PerformanceTracker::new(Arc::new(registry))
    }

    fn comment(provider: &str) -> TrackedComment {
        TrackedComment {
            provider_name: provider.to_string(),
            comment_id: "c1".to_string(),
            posted_at: Utc::now(),
        }
    }

    #[test]
    fn test_schedule_shape() {
        assert_eq!(first_check_delay(), Duration::from_secs(3600));
        assert_eq!(next_check_delay(0), Some(Duration::from_secs(3600)));
        assert_eq!(next_check_delay(6), Some(Duration::from_secs(16 * DAY)));
        assert_eq!(next_check_delay(7), None);

        for pair in TRACKING_SCHEDULE.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        let total: Duration = TRACKING_SCHEDULE.iter().sum();
        assert_eq!(total, Duration::from_secs(30 * DAY));
    }

    #[tokio::test]
    async fn test_check_reads_provider_status() {
        let outcome = tracker().run_check(&comment("live"), 0).await.unwrap();
        assert_eq!(outcome.snapshot.check_index, 0);
        assert_eq!(outcome.snapshot.score, 14);
        assert_eq!(outcome.snapshot.reply_count, 3);
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(5 * HOUR)));
    }

    #[tokio::test]
    async fn test_provider_without_status_is_assumed_present() {
        let outcome = tracker().run_check(&comment("blind"), 2).await.unwrap();
        assert!(outcome.snapshot.exists);
        assert!(!outcome.snapshot.removed);
        assert_eq!(outcome.snapshot.score, 0);
    }

    #[tokio::test]
    async fn test_last_check_has_no_successor() {
        let outcome = tracker().run_check(&comment("live"), 6).await.unwrap();
        assert_eq!(outcome.next_delay, None);

        let past_end = tracker().run_check(&comment("live"), 7).await;
        assert!(matches!(past_end, Err(CoreError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let result = tracker().run_check(&comment("gone"), 0).await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_summary_tracks_peak_and_health() {
        let at = Utc::now();
        let mut snapshots = vec![
            TrackingSnapshot::from_status(
                0,
                at,
                CommentStatus {
                    exists: true,
                    score: 5,
                    removed: false,
                    reply_count: 1,
                },
            ),
            TrackingSnapshot::from_status(
                1,
                at,
                CommentStatus {
                    exists: true,
                    score: 11,
                    removed: false,
                    reply_count: 4,
                },
            ),
        ];

        let summary = summarize(&snapshots);
        assert_eq!(summary.health, CommentHealth::Active);
        assert_eq!(summary.peak_score, 11);
        assert_eq!(summary.reply_count, 4);
        assert_eq!(summary.checks_completed, 2);

        snapshots.push(TrackingSnapshot::from_status(
            2,
            at,
            CommentStatus {
                exists: true,
                score: 2,
                removed: true,
                reply_count: 4,
            },
        ));
        let summary = summarize(&snapshots);
        assert_eq!(summary.health, CommentHealth::Removed);
        assert_eq!(summary.latest_score, 2);
        assert_eq!(summary.peak_score, 11);

        assert_eq!(summarize(&[]).health, CommentHealth::Pending);
    }
}
