use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::fetch::ImageFetcher;
use super::unit::{process_unit, RetryPolicy, SkipReason, UnitOutcome, UnitResult};
use crate::broadcast::JobLogger;
use crate::classify::ImageClassifier;
use crate::config::OrchestratorConfig;
use crate::model::{ExtractionCandidate, ImageRef};

/// What came out of classifying one job's images.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub candidates: Vec<ExtractionCandidate>,
    /// Images handed to the pool.
    pub total: usize,
    /// Units that ran to an outcome. Less than `total` only after cancellation.
    pub processed: usize,
    pub irrelevant: usize,
    pub skipped: Vec<(ImageRef, SkipReason)>,
    pub cancelled: bool,
}

impl PoolReport {
    pub fn relevant(&self) -> usize {
        self.candidates.len()
    }

    /// Share of processed images that were skipped, in percent.
    pub fn skipped_percent(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.skipped.len() as f64 * 100.0 / self.processed as f64
    }

    fn record(&mut self, outcome: UnitOutcome) {
        self.processed += 1;
        match outcome.result {
            UnitResult::Relevant(candidate) => self.candidates.push(candidate),
            UnitResult::Irrelevant => self.irrelevant += 1,
            UnitResult::Skipped(reason) => self.skipped.push((outcome.image, reason)),
        }
    }
}

/// Bounded pool of classification workers.
///
/// Units flow through a channel sized `worker_count * 2`. Cancellation stops
/// the dispatcher; units already taken by a worker run to completion.
#[derive(Clone)]
pub struct ClassificationPool {
    fetcher: Arc<dyn ImageFetcher>,
    classifier: Arc<dyn ImageClassifier>,
    policy: RetryPolicy,
    worker_count: usize,
}

impl ClassificationPool {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        classifier: Arc<dyn ImageClassifier>,
        policy: RetryPolicy,
        worker_count: usize,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            policy,
            worker_count: worker_count.max(1),
        }
    }

    pub fn from_config(
        fetcher: Arc<dyn ImageFetcher>,
        classifier: Arc<dyn ImageClassifier>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self::new(
            fetcher,
            classifier,
            RetryPolicy::from(config),
            config.worker_count,
        )
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub async fn run(
        &self,
        images: Vec<ImageRef>,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> PoolReport {
        let total = images.len();
        let mut report = PoolReport {
            total,
            ..Default::default()
        };
        if total == 0 {
            return report;
        }

        let worker_count = self.worker_count.min(total);
        let (unit_tx, unit_rx) = mpsc::channel::<ImageRef>(worker_count * 2);
        let (result_tx, mut result_rx) = mpsc::channel::<UnitOutcome>(worker_count * 2);
        let unit_rx = Arc::new(Mutex::new(unit_rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let unit_rx = Arc::clone(&unit_rx);
            let result_tx = result_tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let classifier = Arc::clone(&self.classifier);
            let policy = self.policy;
            let cancel = cancel.clone();

            workers.spawn(async move {
                run_worker(
                    worker_id,
                    unit_rx,
                    result_tx,
                    fetcher,
                    classifier,
                    policy,
                    cancel,
                )
                .await;
            });
        }
        drop(result_tx);
        debug!("Started {} classification workers", worker_count);

        let dispatch_cancel = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            for image in images {
                tokio::select! {
                    biased;
                    _ = dispatch_cancel.cancelled() => break,
                    sent = unit_tx.send(image) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        while let Some(outcome) = result_rx.recv().await {
            let position = report.processed + 1;
            match &outcome.result {
                UnitResult::Relevant(candidate) => logger.info(&format!(
                    "Processed {}/{}: image #{} is a {} flyer",
                    position,
                    total,
                    outcome.image.ordinal,
                    candidate.kind()
                )),
                UnitResult::Irrelevant => logger.debug(&format!(
                    "Processed {}/{}: image #{} is not a flyer",
                    position, total, outcome.image.ordinal
                )),
                UnitResult::Skipped(reason) => logger.warn(&format!(
                    "Processed {}/{}: skipped image #{} ({})",
                    position, total, outcome.image.ordinal, reason
                )),
            }
            report.record(outcome);
        }

        if let Err(e) = dispatcher.await {
            error!("Classification dispatcher failed: {}", e);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Classification worker panicked: {}", e);
            }
        }

        report.cancelled = cancel.is_cancelled() && report.processed < total;
        if report.cancelled {
            logger.warn(&format!(
                "Classification cancelled after {}/{} images",
                report.processed, total
            ));
        }
        info!(
            "Classified {} images: {} relevant, {} irrelevant, {} skipped",
            report.processed,
            report.relevant(),
            report.irrelevant,
            report.skipped.len()
        );

        report
    }
}

async fn run_worker(
    worker_id: usize,
    units: Arc<Mutex<mpsc::Receiver<ImageRef>>>,
    results: mpsc::Sender<UnitOutcome>,
    fetcher: Arc<dyn ImageFetcher>,
    classifier: Arc<dyn ImageClassifier>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    debug!("Classification worker {} started", worker_id);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut units = units.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                image = units.recv() => image,
            }
        };
        let Some(image) = next else {
            break;
        };

        let outcome =
            process_unit(image, fetcher.as_ref(), classifier.as_ref(), &policy, &cancel).await;
        if results.send(outcome).await.is_err() {
            error!("Classification worker {} lost its result channel", worker_id);
            break;
        }
    }

    debug!("Classification worker {} stopped", worker_id);
}
