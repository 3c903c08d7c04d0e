//! Review queue: the human gate between a finished job and durable storage.
//!
//! A job that reaches aggregation is written once as `PENDING_REVIEW`. An
//! external reviewer then moves it to `APPROVED` (optionally with an edited
//! dataset) or `REJECTED` with a reason. No other transition exists.

pub mod queue;

pub use queue::SqliteReviewQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broadcast::LogEntry;
use crate::db::DatabaseError;
use crate::model::AggregatedDataset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    Rejected { reason: String },
}

impl ReviewStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected { .. } => "rejected",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Rejected { reason } => write!(f, "rejected ({})", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// What a finished job hands to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub job_id: String,
    pub url: String,
    pub canonical_name: String,
    pub dataset: AggregatedDataset,
    pub logs: Vec<LogEntry>,
    pub skipped_images: usize,
    pub created_at: DateTime<Utc>,
}

/// A persisted review record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub url: String,
    pub canonical_name: String,
    pub dataset: AggregatedDataset,
    #[serde(flatten)]
    pub status: ReviewStatus,
    pub logs: Vec<LogEntry>,
    pub skipped_images: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// True when the reviewer replaced the dataset on approval.
    #[serde(default)]
    pub edited: bool,
}

impl ReviewRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::PendingReview
    }
}

/// Whether a second pending record may exist for the same URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Allow,
}

impl DuplicatePolicy {
    pub fn from_allow(allow: bool) -> Self {
        if allow {
            DuplicatePolicy::Allow
        } else {
            DuplicatePolicy::Reject
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The job id was already recorded. Retries land here.
    AlreadyExists,
}

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("No review record for job '{0}'")]
    NotFound(String),

    #[error("Job '{id}' is {from}, cannot move it to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: &'static str,
    },

    #[error("URL '{url}' already has a pending review record ({existing_id})")]
    DuplicatePending { url: String, existing_id: String },

    #[error("A rejection needs a reason")]
    EmptyReason,

    #[error("Stored record '{id}' is unreadable: {reason}")]
    Corrupt { id: String, reason: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Storage behind the review queue.
pub trait ReviewStore: Send + Sync {
    fn create_pending(&self, record: &PendingRecord) -> Result<CreateOutcome, ReviewError>;

    fn get(&self, job_id: &str) -> Result<Option<ReviewRecord>, ReviewError>;

    /// Pending records, oldest first.
    fn list_pending(&self) -> Result<Vec<ReviewRecord>, ReviewError>;

    /// Approves a pending record, replacing its dataset when `edited` is set.
    fn approve(
        &self,
        job_id: &str,
        edited: Option<AggregatedDataset>,
    ) -> Result<ReviewRecord, ReviewError>;

    fn reject(&self, job_id: &str, reason: &str) -> Result<ReviewRecord, ReviewError>;
}
