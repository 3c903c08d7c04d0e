//! In-memory registry of parse jobs.
//!
//! Holds every job this process has started, including failed and cancelled
//! ones (those never reach the review store), plus the cancellation token of
//! each running job.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{JobPhase, LogEntry};

/// A job as the orchestration layer sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseJob {
    pub id: String,
    pub source_url: String,
    pub state: JobPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_images: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    /// Transcript, attached once the job is terminal.
    pub logs: Vec<LogEntry>,
}

impl ParseJob {
    fn new(id: &str, source_url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            source_url: source_url.to_string(),
            state: JobPhase::Queued,
            created_at: now,
            updated_at: now,
            canonical_name: None,
            error: None,
            skipped_images: None,
            review_id: None,
            logs: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Number of jobs per coarse state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub running: usize,
    pub pending_review: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// How a job ended.
#[derive(Debug, Clone)]
pub enum JobEnd {
    PendingReview { review_id: String, skipped_images: usize },
    Failed { error: String },
    Cancelled,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, ParseJob>>,
    tokens: RwLock<HashMap<String, CancellationToken>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new queued job and returns its cancellation token, or
    /// `None` when the id is already taken.
    pub fn register(&self, job_id: &str, source_url: &str) -> Option<CancellationToken> {
        let mut jobs = write(&self.jobs);
        if jobs.contains_key(job_id) {
            return None;
        }
        jobs.insert(job_id.to_string(), ParseJob::new(job_id, source_url));

        let token = CancellationToken::new();
        write(&self.tokens).insert(job_id.to_string(), token.clone());
        Some(token)
    }

    /// Moves a running job to `phase`. Terminal jobs are left untouched.
    pub fn advance(&self, job_id: &str, phase: JobPhase) {
        if phase.is_terminal() {
            log::warn!("Job {} cannot enter {:?} without an outcome", job_id, phase);
            return;
        }
        self.with_running(job_id, |job| job.state = phase);
    }

    pub fn set_canonical_name(&self, job_id: &str, name: &str) {
        self.with_running(job_id, |job| job.canonical_name = Some(name.to_string()));
    }

    /// Moves a running job to its terminal state and attaches the transcript.
    pub fn finish(&self, job_id: &str, end: JobEnd, logs: Vec<LogEntry>) {
        self.with_running(job_id, move |job| {
            match end {
                JobEnd::PendingReview {
                    review_id,
                    skipped_images,
                } => {
                    job.state = JobPhase::PendingReview;
                    job.review_id = Some(review_id);
                    job.skipped_images = Some(skipped_images);
                }
                JobEnd::Failed { error } => {
                    job.state = JobPhase::Failed;
                    job.error = Some(error);
                }
                JobEnd::Cancelled => job.state = JobPhase::Cancelled,
            }
            job.logs = logs;
        });
        write(&self.tokens).remove(job_id);
    }

    fn with_running(&self, job_id: &str, update: impl FnOnce(&mut ParseJob)) {
        let mut jobs = write(&self.jobs);
        match jobs.get_mut(job_id) {
            Some(job) if !job.is_finished() => {
                update(job);
                job.updated_at = Utc::now();
            }
            Some(job) => log::warn!(
                "Ignoring update to job {}, already {:?}",
                job_id,
                job.state
            ),
            None => log::warn!("Ignoring update to unknown job {}", job_id),
        }
    }

    pub fn get(&self, job_id: &str) -> Option<ParseJob> {
        read(&self.jobs).get(job_id).cloned()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<ParseJob> {
        let mut jobs: Vec<ParseJob> = read(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in read(&self.jobs).values() {
            match job.state {
                JobPhase::PendingReview => counts.pending_review += 1,
                JobPhase::Failed => counts.failed += 1,
                JobPhase::Cancelled => counts.cancelled += 1,
                _ => counts.running += 1,
            }
        }
        counts
    }

    /// Signals a running job to stop. Returns false for unknown or finished
    /// jobs.
    pub fn cancel(&self, job_id: &str) -> bool {
        match read(&self.tokens).get(job_id) {
            Some(token) => {
                token.cancel();
                log::info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }
}
