use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::error::PipelineError;
use crate::aggregate::aggregate;
use crate::broadcast::{
    ChannelEvent, JobLogger, JobPhase, JobProgressBroadcaster, JobProgressTracker, LogChannel,
};
use crate::harvest::Harvester;
use crate::jobs::{JobEnd, JobRegistry};
use crate::model::AggregatedDataset;
use crate::resolve::resolve;
use crate::review::{CreateOutcome, PendingRecord, ReviewError, ReviewStore};
use crate::sanitize::redact_url;
use crate::worker::ClassificationPool;

/// Counts for one completed job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub job_id: String,
    pub canonical_name: String,
    /// Images that passed the CDN filter.
    pub harvested: usize,
    /// Images that ran to an outcome (relevant, irrelevant or skipped).
    pub classified: usize,
    pub relevant: usize,
    pub irrelevant: usize,
    pub skipped: usize,
    /// Records in the aggregated dataset.
    pub candidates: usize,
    pub review: ReviewOutcome,
    pub dataset: AggregatedDataset,
}

impl RunSummary {
    pub fn skipped_percent(&self) -> f64 {
        if self.classified == 0 {
            return 0.0;
        }
        self.skipped as f64 * 100.0 / self.classified as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Created,
    AlreadyQueued,
}

impl From<CreateOutcome> for ReviewOutcome {
    fn from(outcome: CreateOutcome) -> Self {
        match outcome {
            CreateOutcome::Created => ReviewOutcome::Created,
            CreateOutcome::AlreadyExists => ReviewOutcome::AlreadyQueued,
        }
    }
}

/// Runs parse jobs end to end: harvest, resolve name, classify, aggregate,
/// persist for review.
pub struct Pipeline {
    harvester: Harvester,
    pool: ClassificationPool,
    review: Arc<dyn ReviewStore>,
    channel: LogChannel,
    registry: Arc<JobRegistry>,
    progress: JobProgressBroadcaster,
    job_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        harvester: Harvester,
        pool: ClassificationPool,
        review: Arc<dyn ReviewStore>,
        channel: LogChannel,
        job_timeout: Duration,
    ) -> Self {
        Self {
            harvester,
            pool,
            review,
            channel,
            registry: Arc::new(JobRegistry::new()),
            progress: JobProgressBroadcaster::default(),
            job_timeout,
        }
    }

    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress(mut self, progress: JobProgressBroadcaster) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &LogChannel {
        &self.channel
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.progress
    }

    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    /// Runs a job under a fresh id and waits for it.
    pub async fn run(&self, url: &str) -> Result<RunSummary, PipelineError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.run_job(&job_id, url).await
    }

    /// Runs a job under a caller-chosen id and waits for it.
    pub async fn run_job(&self, job_id: &str, url: &str) -> Result<RunSummary, PipelineError> {
        let cancel = self.begin(job_id, url)?;
        self.drive(job_id, url, cancel).await
    }

    /// Starts a job in the background and returns its id at once.
    pub fn submit(self: &Arc<Self>, url: &str) -> Result<String, PipelineError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.begin(&job_id, url)?;

        let pipeline = Arc::clone(self);
        let id = job_id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = pipeline.drive(&id, &url, cancel).await {
                log::debug!("Background job {} ended: {}", id, e);
            }
        });

        Ok(job_id)
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id)
    }

    /// Writes a record that an earlier run failed to persist.
    pub fn retry_persistence(&self, record: &PendingRecord) -> Result<CreateOutcome, ReviewError> {
        self.review.create_pending(record)
    }

    fn begin(&self, job_id: &str, url: &str) -> Result<CancellationToken, PipelineError> {
        self.registry
            .register(job_id, url)
            .ok_or_else(|| PipelineError::DuplicateJob(job_id.to_string()))
    }

    async fn drive(
        &self,
        job_id: &str,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let logger = JobLogger::new(job_id, self.channel.clone());
        let tracker = self.progress.start_job(job_id, &redact_url(url));
        logger.info(&format!("Parse job started for {}", redact_url(url)));

        // The timeout trips the token so every stage can shut down cleanly.
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            let limit = self.job_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        timed_out.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                }
            })
        };

        let result = self.execute(job_id, url, &logger, &tracker, &cancel).await;
        watchdog.abort();

        let result = match result {
            Err(PipelineError::Cancelled) if timed_out.load(Ordering::SeqCst) => {
                Err(PipelineError::JobTimeout(self.job_timeout))
            }
            other => other,
        };

        // The registry is final before the terminal progress event goes out.
        match &result {
            Ok(summary) => {
                logger.info(&format!(
                    "Job finished: {} records pending review, {} of {} images skipped",
                    summary.candidates, summary.skipped, summary.classified
                ));
                self.registry.finish(
                    job_id,
                    JobEnd::PendingReview {
                        review_id: job_id.to_string(),
                        skipped_images: summary.skipped,
                    },
                    logger.transcript(),
                );
                tracker.pending_review(job_id, summary.skipped);
            }
            Err(PipelineError::Cancelled) => {
                logger.warn("Job cancelled");
                self.registry
                    .finish(job_id, JobEnd::Cancelled, logger.transcript());
                tracker.cancelled();
            }
            Err(e) => {
                if let PipelineError::AuthRequired { url } = e {
                    self.channel.notify(ChannelEvent::AuthRequired {
                        job_id: job_id.to_string(),
                        url: url.clone(),
                    });
                }
                logger.error(&format!("Job failed: {}", e));
                self.registry.finish(
                    job_id,
                    JobEnd::Failed {
                        error: e.to_string(),
                    },
                    logger.transcript(),
                );
                tracker.failed(&e.to_string());
            }
        }

        result
    }

    fn enter(&self, job_id: &str, tracker: &JobProgressTracker, phase: JobPhase, message: &str) {
        self.registry.advance(job_id, phase);
        tracker.update_phase(phase, message);
    }

    async fn execute(
        &self,
        job_id: &str,
        url: &str,
        logger: &JobLogger,
        tracker: &JobProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let redacted = redact_url(url);

        self.enter(job_id, tracker, JobPhase::Harvesting, "Harvesting images");
        let harvest = self
            .harvester
            .harvest(url, logger, cancel)
            .instrument(info_span!("harvest", job_id = %job_id, url = %redacted))
            .await?;

        self.enter(job_id, tracker, JobPhase::Resolving, "Resolving source name");
        let canonical_name = info_span!("resolve_name", job_id = %job_id)
            .in_scope(|| resolve(&harvest.header_text));
        self.registry.set_canonical_name(job_id, &canonical_name);
        logger.info(&format!("Source name: {}", canonical_name));

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let harvested = harvest.images.len();
        self.enter(
            job_id,
            tracker,
            JobPhase::Classifying,
            &format!("Classifying {} images", harvested),
        );
        logger.info(&format!(
            "Classifying {} images with {} workers",
            harvested,
            self.pool.worker_count().min(harvested.max(1))
        ));
        let report = self
            .pool
            .run(harvest.images, logger, cancel)
            .instrument(info_span!("classify", job_id = %job_id, images = harvested))
            .await;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if !report.skipped.is_empty() {
            logger.warn(&format!(
                "Skipped {} of {} images ({:.0}%)",
                report.skipped.len(),
                report.processed,
                report.skipped_percent()
            ));
        }

        self.enter(job_id, tracker, JobPhase::Aggregating, "Aggregating candidates");
        let dataset = info_span!("aggregate", job_id = %job_id, candidates = report.candidates.len())
            .in_scope(|| aggregate(&report.candidates));
        logger.info(&format!(
            "Aggregated {} candidates into {} vendors, {} djs, {} venues, {} shows",
            report.candidates.len(),
            dataset.vendors.len(),
            dataset.djs.len(),
            dataset.venues.len(),
            dataset.shows.len()
        ));

        self.enter(job_id, tracker, JobPhase::Persisting, "Queuing dataset for review");
        logger.info("Queuing dataset for review");
        let record = PendingRecord {
            job_id: job_id.to_string(),
            url: url.to_string(),
            canonical_name: canonical_name.clone(),
            dataset,
            logs: logger.transcript(),
            skipped_images: report.skipped.len(),
            created_at: Utc::now(),
        };

        let created = info_span!("persist", job_id = %job_id)
            .in_scope(|| self.review.create_pending(&record));
        let review = match created {
            Ok(outcome) => ReviewOutcome::from(outcome),
            Err(ReviewError::DuplicatePending { existing_id, .. }) => {
                return Err(PipelineError::DuplicatePending {
                    url: redacted,
                    existing_job_id: existing_id,
                })
            }
            Err(source) => {
                return Err(PipelineError::Persistence {
                    source,
                    record: Box::new(record),
                })
            }
        };

        Ok(RunSummary {
            job_id: job_id.to_string(),
            canonical_name,
            harvested,
            classified: report.processed,
            relevant: report.relevant(),
            irrelevant: report.irrelevant,
            skipped: report.skipped.len(),
            candidates: record.dataset.len(),
            review,
            dataset: record.dataset,
        })
    }
}
