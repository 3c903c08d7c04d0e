use std::time::Duration;

use thiserror::Error;

use crate::error::HarvestError;
use crate::review::{PendingRecord, ReviewError};

/// Why a job ended without a review record.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source page sits behind a login wall.
    #[error("Login required to view '{url}'")]
    AuthRequired { url: String },

    #[error("Navigation to '{url}' timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Harvest failed: {0}")]
    Harvest(HarvestError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job exceeded its {0:?} time limit")]
    JobTimeout(Duration),

    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    /// The URL already has a record awaiting review. Nothing was written
    /// and retrying cannot succeed until that record is reviewed.
    #[error("'{url}' already has a record pending review (job {existing_job_id})")]
    DuplicatePending {
        url: String,
        existing_job_id: String,
    },

    /// The review record could not be written. The record is kept so the
    /// caller can retry without re-running the job.
    #[error("Failed to persist review record: {source}")]
    Persistence {
        #[source]
        source: ReviewError,
        record: Box<PendingRecord>,
    },
}

impl PipelineError {
    /// Fatal errors abort a job into the failed state. Cancellation is a
    /// separate terminal state and a duplicate id never started a job.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Cancelled | PipelineError::DuplicateJob(_))
    }

    /// The dataset and transcript of a job whose persistence failed.
    pub fn pending_record(&self) -> Option<&PendingRecord> {
        match self {
            PipelineError::Persistence { record, .. } => Some(record),
            _ => None,
        }
    }
}

impl From<HarvestError> for PipelineError {
    fn from(e: HarvestError) -> Self {
        match e {
            HarvestError::AuthRequired { url } => PipelineError::AuthRequired { url },
            HarvestError::NavigationTimeout { url, timeout } => {
                PipelineError::NavigationTimeout { url, timeout }
            }
            HarvestError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Harvest(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_errors_map_onto_job_errors() {
        assert!(matches!(
            PipelineError::from(HarvestError::AuthRequired {
                url: "https://x".into()
            }),
            PipelineError::AuthRequired { .. }
        ));
        assert!(matches!(
            PipelineError::from(HarvestError::Cancelled),
            PipelineError::Cancelled
        ));
        assert!(matches!(
            PipelineError::from(HarvestError::Launch("no chrome".into())),
            PipelineError::Harvest(_)
        ));
    }

    #[test]
    fn test_fatality() {
        assert!(PipelineError::AuthRequired { url: "u".into() }.is_fatal());
        assert!(PipelineError::JobTimeout(Duration::from_secs(1)).is_fatal());
        assert!(!PipelineError::Cancelled.is_fatal());
        assert!(!PipelineError::DuplicateJob("j".into()).is_fatal());
        let duplicate = PipelineError::DuplicatePending {
            url: "u".into(),
            existing_job_id: "j".into(),
        };
        assert!(duplicate.is_fatal());
        assert!(duplicate.pending_record().is_none());
    }
}
