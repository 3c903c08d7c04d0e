//! One unit of orchestrator work: download an image, then classify it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::fetch::ImageFetcher;
use crate::classify::ImageClassifier;
use crate::config::OrchestratorConfig;
use crate::error::ClassifyError;
use crate::model::{ExtractionCandidate, ImageRef};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    pub download_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Why an image contributed nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Download(String),
    Rejected(String),
    Unparseable(String),
    RetriesExhausted { attempts: u32, last_error: String },
    /// The job was cancelled while the unit was waiting to retry.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Download(e) => write!(f, "download failed: {}", e),
            SkipReason::Rejected(e) => write!(f, "classifier rejected image: {}", e),
            SkipReason::Unparseable(e) => write!(f, "unparseable classifier result: {}", e),
            SkipReason::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "classifier unavailable after {} attempts: {}",
                attempts, last_error
            ),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitResult {
    Relevant(ExtractionCandidate),
    Irrelevant,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub image: ImageRef,
    pub result: UnitResult,
    /// Classification attempts made (0 when the download failed).
    pub attempts: u32,
}

/// Downloads and classifies one image. Never fails: every problem becomes
/// a [`SkipReason`].
pub async fn process_unit(
    image: ImageRef,
    fetcher: &dyn ImageFetcher,
    classifier: &dyn ImageClassifier,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> UnitOutcome {
    let fetched = match tokio::time::timeout(policy.download_timeout, fetcher.fetch(&image.url)).await
    {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(e)) => {
            return UnitOutcome {
                image,
                result: UnitResult::Skipped(SkipReason::Download(e.to_string())),
                attempts: 0,
            }
        }
        Err(_) => {
            return UnitOutcome {
                image,
                result: UnitResult::Skipped(SkipReason::Download(format!(
                    "timed out after {:?}",
                    policy.download_timeout
                ))),
                attempts: 0,
            }
        }
    };

    let mut attempt = 0;
    let result = loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(
            policy.attempt_timeout,
            classifier.classify(&fetched.bytes, &fetched.mime_type),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ClassifyError::Unavailable(format!(
                "attempt timed out after {:?}",
                policy.attempt_timeout
            ))),
        };

        match outcome {
            Ok(Some(classification)) => {
                break UnitResult::Relevant(classification.into_candidate(&image))
            }
            Ok(None) => break UnitResult::Irrelevant,
            Err(ClassifyError::Unavailable(e)) => {
                if attempt >= policy.max_attempts {
                    break UnitResult::Skipped(SkipReason::RetriesExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let delay = policy.backoff(attempt);
                log::debug!(
                    "Classifier unavailable for image #{} (attempt {}), retrying in {:?}: {}",
                    image.ordinal,
                    attempt,
                    delay,
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => break UnitResult::Skipped(SkipReason::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(ClassifyError::Unparseable(e)) => {
                break UnitResult::Skipped(SkipReason::Unparseable(e))
            }
            Err(ClassifyError::Rejected(e)) | Err(ClassifyError::Config(e)) => {
                break UnitResult::Skipped(SkipReason::Rejected(e))
            }
        }
    };

    UnitOutcome {
        image,
        result,
        attempts: attempt,
    }
}
