//! Job progress events for UIs that track a parse job phase by phase.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Harvesting,
    Resolving,
    Classifying,
    Aggregating,
    Persisting,
    PendingReview,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::PendingReview | JobPhase::Failed | JobPhase::Cancelled
        )
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Harvesting => write!(f, "Harvesting images"),
            JobPhase::Resolving => write!(f, "Resolving source name"),
            JobPhase::Classifying => write!(f, "Classifying images"),
            JobPhase::Aggregating => write!(f, "Aggregating candidates"),
            JobPhase::Persisting => write!(f, "Persisting"),
            JobPhase::PendingReview => write!(f, "Pending review"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl From<JobPhase> for JobStatus {
    fn from(phase: JobPhase) -> Self {
        match phase {
            JobPhase::PendingReview => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            JobPhase::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub source_url: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Fatal reason (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Id of the review record (set once pending review).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_images: Option<usize>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, source_url: &str, phase: JobPhase, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            source_url: source_url.to_string(),
            phase,
            status: phase.into(),
            message: message.to_string(),
            timestamp: Utc::now(),
            error: None,
            review_id: None,
            skipped_images: None,
        }
    }
}

/// Fan-out of [`JobProgressEvent`]s to any number of listeners.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job and emits its `queued` event.
    pub fn start_job(&self, job_id: &str, source_url: &str) -> JobProgressTracker {
        let tracker = JobProgressTracker {
            job_id: job_id.to_string(),
            source_url: source_url.to_string(),
            sender: Arc::clone(&self.sender),
        };
        tracker.update_phase(JobPhase::Queued, "Job queued");
        tracker
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

pub struct JobProgressTracker {
    job_id: String,
    source_url: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::new(&self.job_id, &self.source_url, phase, message));
    }

    pub fn pending_review(&self, review_id: &str, skipped_images: usize) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.source_url,
            JobPhase::PendingReview,
            "Dataset queued for review",
        );
        event.review_id = Some(review_id.to_string());
        event.skipped_images = Some(skipped_images);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, error: &str) {
        let mut event =
            JobProgressEvent::new(&self.job_id, &self.source_url, JobPhase::Failed, "Job failed");
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }

    pub fn cancelled(&self) {
        self.update_phase(JobPhase::Cancelled, "Job cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_job_emits_queued() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start_job("job-1", "https://example.com/events");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.phase, JobPhase::Queued);
        assert_eq!(received.status, JobStatus::Running);

        tracker.update_phase(JobPhase::Classifying, "Classifying 12 images");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Classifying);
        assert_eq!(received.message, "Classifying 12 images");
    }

    #[test]
    fn test_terminal_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.start_job("job-2", "https://example.com/events");
        let _ = rx.try_recv();

        tracker.pending_review("job-2", 3);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.review_id.as_deref(), Some("job-2"));
        assert_eq!(received.skipped_images, Some(3));
        assert!(received.phase.is_terminal());

        tracker.failed("Login required");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.error.as_deref(), Some("Login required"));
    }

    #[test]
    fn test_event_serialization() {
        let event = JobProgressEvent::new("j", "u", JobPhase::PendingReview, "m");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "pending_review");
        assert_eq!(json["sourceUrl"], "u");
        assert!(json.get("error").is_none());
    }
}
