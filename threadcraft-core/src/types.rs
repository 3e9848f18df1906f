use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCommentRequest {
    pub thread_url: String,
    pub comment_text: String,
    pub subreddit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCommentResult {
    pub success: bool,
    pub comment_id: Option<String>,
    pub comment_url: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Only meaningful when `success` is false.
    pub retryable: bool,
}

impl PostCommentResult {
    pub fn posted(comment_id: String, comment_url: Option<String>) -> Self {
        Self {
            success: true,
            comment_id: Some(comment_id),
            comment_url,
            error: None,
            error_code: None,
            retryable: false,
        }
    }

    pub fn failed(error: impl Into<String>, error_code: Option<String>, retryable: bool) -> Self {
        Self {
            success: false,
            comment_id: None,
            comment_url: None,
            error: Some(error.into()),
            error_code,
            retryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentStatus {
    pub exists: bool,
    pub score: i64,
    pub removed: bool,
    pub reply_count: u32,
}

impl CommentStatus {
    /// Fallback when a provider cannot report status.
    pub fn assumed_present() -> Self {
        Self {
            exists: true,
            score: 0,
            removed: false,
            reply_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedComment {
    pub provider_name: String,
    pub comment_id: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub check_index: usize,
    pub checked_at: DateTime<Utc>,
    pub score: i64,
    pub reply_count: u32,
    pub exists: bool,
    pub removed: bool,
}

impl TrackingSnapshot {
    pub fn from_status(check_index: usize, checked_at: DateTime<Utc>, status: CommentStatus) -> Self {
        Self {
            check_index,
            checked_at,
            score: status.score,
            reply_count: status.reply_count,
            exists: status.exists,
            removed: status.removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContext {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringCandidate {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub subreddit: String,
    pub url: String,
    pub business: BusinessContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Showcase,
    Question,
    Discussion,
}

impl PostType {
    pub const ALL: [PostType; 3] = [PostType::Showcase, PostType::Question, PostType::Discussion];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Showcase => "showcase",
            PostType::Question => "question",
            PostType::Discussion => "discussion",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub relevance: f64,
    pub reasoning: String,
    pub post_type: PostType,
}

impl ScoringResult {
    pub fn is_accepted(&self, threshold: f64) -> bool {
        self.relevance >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    OpportunityPosted,
    PermanentPurchase,
    MonthlyAllowance,
    Refund,
    AdminAdjustment,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::OpportunityPosted => "opportunity_posted",
            CreditReason::PermanentPurchase => "permanent_purchase",
            CreditReason::MonthlyAllowance => "monthly_allowance",
            CreditReason::Refund => "refund",
            CreditReason::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "opportunity_posted" => Some(CreditReason::OpportunityPosted),
            "permanent_purchase" => Some(CreditReason::PermanentPurchase),
            "monthly_allowance" => Some(CreditReason::MonthlyAllowance),
            "refund" => Some(CreditReason::Refund),
            "admin_adjustment" => Some(CreditReason::AdminAdjustment),
            _ => None,
        }
    }
}

impl fmt::Display for CreditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub credits: i64,
    pub permanent_credits: i64,
}

impl CreditAccount {
    /// Spendable total across both tiers.
    pub fn available(&self) -> Result<i64, CoreError> {
        self.credits
            .checked_add(self.permanent_credits)
            .ok_or_else(|| {
                CoreError::invalid_input(format!(
                    "credit total {} + {} is out of range",
                    self.credits, self.permanent_credits
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub delta: i64,
    pub previous_total: i64,
    pub new_total: i64,
    pub reason: CreditReason,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}
