use chrono::{DateTime, Utc};

use super::{
    CreateOutcome, DuplicatePolicy, PendingRecord, ReviewError, ReviewRecord, ReviewStatus,
    ReviewStore,
};
use crate::db::parse_job_repo::{
    self, InsertOutcome, ParseJobRow, ReviewUpdate, STATUS_APPROVED, STATUS_PENDING,
    STATUS_REJECTED,
};
use crate::db::Database;
use crate::model::AggregatedDataset;

/// Review queue persisted in the `parse_jobs` table.
#[derive(Clone)]
pub struct SqliteReviewQueue {
    db: Database,
    policy: DuplicatePolicy,
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(id: &str, s: &str) -> Result<DateTime<Utc>, ReviewError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReviewError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn encode<T: serde::Serialize>(id: &str, value: &T) -> Result<String, ReviewError> {
    serde_json::to_string(value).map_err(|e| ReviewError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    id: &str,
    column: &str,
    text: &str,
) -> Result<T, ReviewError> {
    serde_json::from_str(text).map_err(|e| ReviewError::Corrupt {
        id: id.to_string(),
        reason: format!("{}: {}", column, e),
    })
}

fn to_row(record: &PendingRecord) -> Result<ParseJobRow, ReviewError> {
    Ok(ParseJobRow {
        id: record.job_id.clone(),
        url: record.url.clone(),
        canonical_name: record.canonical_name.clone(),
        dataset: encode(&record.job_id, &record.dataset)?,
        status: STATUS_PENDING.to_string(),
        rejection_reason: None,
        logs: encode(&record.job_id, &record.logs)?,
        skipped_images: record.skipped_images as i64,
        created_at: format_timestamp(record.created_at),
        reviewed_at: None,
        edited: false,
    })
}

fn from_row(row: ParseJobRow) -> Result<ReviewRecord, ReviewError> {
    let status = match row.status.as_str() {
        STATUS_PENDING => ReviewStatus::PendingReview,
        STATUS_APPROVED => ReviewStatus::Approved,
        STATUS_REJECTED => ReviewStatus::Rejected {
            reason: row.rejection_reason.clone().unwrap_or_default(),
        },
        other => {
            return Err(ReviewError::Corrupt {
                id: row.id,
                reason: format!("unknown status '{}'", other),
            })
        }
    };

    let reviewed_at = match row.reviewed_at.as_deref() {
        Some(s) => Some(parse_timestamp(&row.id, s)?),
        None => None,
    };

    Ok(ReviewRecord {
        dataset: decode(&row.id, "dataset", &row.dataset)?,
        logs: decode(&row.id, "logs", &row.logs)?,
        created_at: parse_timestamp(&row.id, &row.created_at)?,
        reviewed_at,
        status,
        skipped_images: row.skipped_images.max(0) as usize,
        edited: row.edited,
        canonical_name: row.canonical_name,
        url: row.url,
        id: row.id,
    })
}

impl SqliteReviewQueue {
    pub fn new(db: Database, policy: DuplicatePolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn count(&self, status: &ReviewStatus) -> Result<u64, ReviewError> {
        Ok(parse_job_repo::count_by_status(&self.db, status.label())?)
    }

    fn decide(
        &self,
        job_id: &str,
        target: &'static str,
        update: ReviewUpdate<'_>,
    ) -> Result<ReviewRecord, ReviewError> {
        if !parse_job_repo::update_review(&self.db, job_id, &update)? {
            return match self.get(job_id)? {
                None => Err(ReviewError::NotFound(job_id.to_string())),
                Some(current) => Err(ReviewError::InvalidTransition {
                    id: job_id.to_string(),
                    from: current.status.to_string(),
                    to: target,
                }),
            };
        }

        log::info!("Review record {} is now {}", job_id, target);
        self.get(job_id)?
            .ok_or_else(|| ReviewError::NotFound(job_id.to_string()))
    }
}

impl ReviewStore for SqliteReviewQueue {
    fn create_pending(&self, record: &PendingRecord) -> Result<CreateOutcome, ReviewError> {
        let row = to_row(record)?;
        let allow = self.policy == DuplicatePolicy::Allow;

        match parse_job_repo::insert_pending(&self.db, &row, allow)? {
            InsertOutcome::Inserted => {
                log::info!(
                    "Queued job {} for review ({} records, {} skipped images)",
                    record.job_id,
                    record.dataset.len(),
                    record.skipped_images
                );
                Ok(CreateOutcome::Created)
            }
            InsertOutcome::SameId(_) => {
                log::warn!(
                    "Review record for job {} already exists, not writing it again",
                    record.job_id
                );
                Ok(CreateOutcome::AlreadyExists)
            }
            InsertOutcome::PendingForUrl(existing) => Err(ReviewError::DuplicatePending {
                url: crate::sanitize::redact_url(&record.url),
                existing_id: existing.id,
            }),
        }
    }

    fn get(&self, job_id: &str) -> Result<Option<ReviewRecord>, ReviewError> {
        parse_job_repo::find_by_id(&self.db, job_id)?
            .map(from_row)
            .transpose()
    }

    fn list_pending(&self) -> Result<Vec<ReviewRecord>, ReviewError> {
        parse_job_repo::list_by_status(&self.db, STATUS_PENDING)?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn approve(
        &self,
        job_id: &str,
        edited: Option<AggregatedDataset>,
    ) -> Result<ReviewRecord, ReviewError> {
        let dataset = edited
            .as_ref()
            .map(|d| encode(job_id, d))
            .transpose()?;
        let reviewed_at = format_timestamp(Utc::now());

        self.decide(
            job_id,
            STATUS_APPROVED,
            ReviewUpdate {
                status: STATUS_APPROVED,
                rejection_reason: None,
                dataset: dataset.as_deref(),
                reviewed_at: &reviewed_at,
            },
        )
    }

    fn reject(&self, job_id: &str, reason: &str) -> Result<ReviewRecord, ReviewError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::EmptyReason);
        }
        let reviewed_at = format_timestamp(Utc::now());

        self.decide(
            job_id,
            STATUS_REJECTED,
            ReviewUpdate {
                status: STATUS_REJECTED,
                rejection_reason: Some(reason),
                dataset: None,
                reviewed_at: &reviewed_at,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{LogEntry, LogLevel};
    use crate::model::{Merged, ShowFields};

    fn queue(policy: DuplicatePolicy) -> SqliteReviewQueue {
        SqliteReviewQueue::new(Database::open_in_memory().unwrap(), policy)
    }

    fn dataset(venue: &str) -> AggregatedDataset {
        AggregatedDataset {
            shows: vec![Merged {
                fields: ShowFields {
                    venue_name: venue.to_string(),
                    day: Some("friday".to_string()),
                    ..Default::default()
                },
                confidence: 0.9,
                sources: vec!["https://cdn/1.jpg".to_string()],
                synthesized: false,
            }],
            ..Default::default()
        }
    }

    fn pending(job_id: &str, url: &str) -> PendingRecord {
        PendingRecord {
            job_id: job_id.to_string(),
            url: url.to_string(),
            canonical_name: "Night Owls".to_string(),
            dataset: dataset("The Roxy"),
            logs: vec![LogEntry {
                id: 1,
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: "Harvested 1 image".to_string(),
                job_id: Some(job_id.to_string()),
            }],
            skipped_images: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_and_read_back() {
        let q = queue(DuplicatePolicy::Reject);
        let record = pending("j1", "https://fb.example/a");
        assert_eq!(q.create_pending(&record).unwrap(), CreateOutcome::Created);

        let stored = q.get("j1").unwrap().unwrap();
        assert!(stored.is_pending());
        assert_eq!(stored.dataset, record.dataset);
        assert_eq!(stored.logs, record.logs);
        assert_eq!(stored.skipped_images, 1);
        assert_eq!(q.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_retry_with_same_job_id_does_not_duplicate() {
        let q = queue(DuplicatePolicy::Allow);
        let record = pending("j1", "https://fb.example/a");
        q.create_pending(&record).unwrap();
        assert_eq!(
            q.create_pending(&record).unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(q.count(&ReviewStatus::PendingReview).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_url_policy() {
        let strict = queue(DuplicatePolicy::Reject);
        strict.create_pending(&pending("j1", "https://a")).unwrap();
        match strict.create_pending(&pending("j2", "https://a")) {
            Err(ReviewError::DuplicatePending { existing_id, .. }) => {
                assert_eq!(existing_id, "j1")
            }
            other => panic!("unexpected: {:?}", other),
        }

        let lenient = queue(DuplicatePolicy::Allow);
        lenient.create_pending(&pending("j1", "https://a")).unwrap();
        assert_eq!(
            lenient.create_pending(&pending("j2", "https://a")).unwrap(),
            CreateOutcome::Created
        );
    }

    #[test]
    fn test_reviewed_url_can_be_parsed_again() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();
        q.reject("j1", "blurry").unwrap();
        assert_eq!(
            q.create_pending(&pending("j2", "https://a")).unwrap(),
            CreateOutcome::Created
        );
    }

    #[test]
    fn test_approve_with_edits() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();

        let approved = q.approve("j1", Some(dataset("Club Edit"))).unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert!(approved.edited);
        assert_eq!(approved.dataset.shows[0].fields.venue_name, "Club Edit");
        assert!(approved.reviewed_at.is_some());
        assert!(q.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_approve_without_edits_keeps_dataset() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();
        let approved = q.approve("j1", None).unwrap();
        assert!(!approved.edited);
        assert_eq!(approved.dataset, dataset("The Roxy"));
    }

    #[test]
    fn test_state_machine() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();
        let rejected = q.reject("j1", "  wrong city ").unwrap();
        assert_eq!(
            rejected.status,
            ReviewStatus::Rejected {
                reason: "wrong city".to_string()
            }
        );

        assert!(matches!(
            q.approve("j1", None),
            Err(ReviewError::InvalidTransition { to: "approved", .. })
        ));
        assert!(matches!(
            q.reject("j1", "again"),
            Err(ReviewError::InvalidTransition { .. })
        ));
        assert!(matches!(q.approve("nope", None), Err(ReviewError::NotFound(_))));
    }

    #[test]
    fn test_reject_needs_reason() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();
        assert!(matches!(q.reject("j1", "   "), Err(ReviewError::EmptyReason)));
        assert!(q.get("j1").unwrap().unwrap().is_pending());
    }

    #[test]
    fn test_record_serializes_status_inline() {
        let q = queue(DuplicatePolicy::Reject);
        q.create_pending(&pending("j1", "https://a")).unwrap();
        let record = q.reject("j1", "spam").unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"], "spam");
        assert_eq!(json["canonicalName"], "Night Owls");
    }
}
