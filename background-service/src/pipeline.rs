use crate::tracker::first_check_delay;
use chrono::Utc;
use database::{CreditLedger, DeductOptions, DeductResult};
use llm_interface::RelevanceScorer;
use posting_providers::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use threadcraft_core::{
    run_bounded_settled, CoreError, CreditError, CreditReason, PipelineSettings,
    PostCommentRequest, ProviderError, ScoringCandidate, ScoringResult, TrackedComment,
};
use tracing::{error, info};

/// A scored-or-not thread together with the reply a user wants to post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub user_id: String,
    pub candidate: ScoringCandidate,
    pub comment_text: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Rejected {
        scoring: ScoringResult,
    },
    InsufficientCredits {
        scoring: ScoringResult,
        message: String,
    },
    PostFailed {
        scoring: ScoringResult,
        error: String,
        error_code: Option<String>,
        retryable: bool,
        /// Set when the charge for this post could not be returned.
        refund_error: Option<String>,
    },
    Posted {
        scoring: ScoringResult,
        tracked: TrackedComment,
        comment_url: Option<String>,
        first_check_in: Duration,
    },
}

/// Score, pay, post, and hand the comment to tracking.
pub struct Pipeline {
    scorer: RelevanceScorer,
    ledger: CreditLedger,
    registry: Arc<ProviderRegistry>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        scorer: RelevanceScorer,
        ledger: CreditLedger,
        registry: Arc<ProviderRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            scorer,
            ledger,
            registry,
            settings,
        }
    }

    /// Scores every candidate with bounded parallelism. One failed score
    /// does not affect the others.
    pub async fn score_batch(
        &self,
        candidates: Vec<ScoringCandidate>,
    ) -> Vec<Result<ScoringResult, CoreError>> {
        let total = candidates.len();
        let results = run_bounded_settled(
            candidates,
            self.settings.scoring_concurrency,
            |candidate| async move { self.scorer.score(&candidate).await },
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!("Scored {} candidates, {} failed", total, failed);
        results
    }

    pub async fn process(&self, opportunity: &Opportunity) -> Result<ProcessOutcome, CoreError> {
        let candidate = &opportunity.candidate;
        let scoring = self.scorer.score(candidate).await?;

        if !scoring.is_accepted(self.settings.relevance_threshold) {
            info!(
                "Rejected {} at {:.2} (threshold {:.2})",
                candidate.url, scoring.relevance, self.settings.relevance_threshold
            );
            return Ok(ProcessOutcome::Rejected { scoring });
        }

        let provider = self
            .registry
            .first_available()
            .ok_or(CoreError::Provider(ProviderError::NoneAvailable))?;

        let cost = self.settings.credits_per_post;
        let debit = self
            .ledger
            .deduct(
                &opportunity.user_id,
                cost,
                CreditReason::OpportunityPosted,
                DeductOptions::non_throwing().with_detail(candidate.url.clone()),
            )
            .await?;
        if !debit.success {
            return Ok(ProcessOutcome::InsufficientCredits {
                scoring,
                message: debit
                    .error
                    .unwrap_or_else(|| "insufficient credits".to_string()),
            });
        }

        let request = PostCommentRequest {
            thread_url: candidate.url.clone(),
            comment_text: opportunity.comment_text.clone(),
            subreddit: candidate.subreddit.clone(),
            parent_comment_id: opportunity.parent_comment_id.clone(),
        };

        let result = match provider.post_comment(&request).await {
            Ok(result) => result,
            Err(e) => {
                self.refund(&opportunity.user_id, &debit, &candidate.url)
                    .await
                    .map_err(|refund| {
                        error!("Post to {} failed before refund: {}", candidate.url, e);
                        refund
                    })?;
                return Err(e);
            }
        };

        match (result.success, result.comment_id) {
            (true, Some(comment_id)) => {
                let tracked = TrackedComment {
                    provider_name: provider.name().to_string(),
                    comment_id,
                    posted_at: Utc::now(),
                };
                info!(
                    "Posted {} on {} via {}",
                    tracked.comment_id, candidate.url, tracked.provider_name
                );
                Ok(ProcessOutcome::Posted {
                    scoring,
                    tracked,
                    comment_url: result.comment_url,
                    first_check_in: first_check_delay(),
                })
            }
            _ => {
                let refund_error = self
                    .refund(&opportunity.user_id, &debit, &candidate.url)
                    .await
                    .err()
                    .map(|e| e.to_string());
                Ok(ProcessOutcome::PostFailed {
                    scoring,
                    error: result
                        .error
                        .unwrap_or_else(|| "provider returned no comment id".to_string()),
                    error_code: result.error_code,
                    retryable: result.retryable,
                    refund_error,
                })
            }
        }
    }

    async fn refund(
        &self,
        user_id: &str,
        debit: &DeductResult,
        url: &str,
    ) -> Result<(), CoreError> {
        let detail = format!("post failed: {}", url);
        let amount = debit.credits_deducted + debit.permanent_credits_deducted;
        self.ledger
            .refund(user_id, debit, Some(&detail))
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("Refund of {} credits to {} failed: {}", amount, user_id, e);
                CreditError::RefundFailed {
                    user_id: user_id.to_string(),
                    amount,
                    reason: e.to_string(),
                }
                .into()
            })
    }
}
