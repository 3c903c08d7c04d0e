//! Service wiring: builds every component from a [`Config`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{BrowserLoginDriver, CredentialHandoff, LoginDriver};
use crate::broadcast::{JobProgressBroadcaster, LogChannel, LogChannelSettings};
use crate::classify::{ImageClassifier, VisionClassifier};
use crate::config::{Config, LogChannelConfig};
use crate::db::Database;
use crate::error::{ClassifyError, FlyerscanError, SessionError};
use crate::harvest::{BrowserGate, BrowserLauncher, Harvester};
use crate::jobs::JobRegistry;
use crate::pipeline::Pipeline;
use crate::review::{DuplicatePolicy, ReviewStore, SqliteReviewQueue};
use crate::secrets::{resolve_secret_optional, SessionCipher};
use crate::session::{FileSessionStore, SessionStore};
use crate::worker::{ClassificationPool, HttpImageFetcher, ImageFetcher};

impl From<&LogChannelConfig> for LogChannelSettings {
    fn from(config: &LogChannelConfig) -> Self {
        Self {
            window_size: config.window_size.max(1),
            retention: Duration::from_secs(config.retention_secs),
            ..Self::default()
        }
    }
}

/// Collaborators that can be swapped out. Anything left `None` is built
/// from the config.
#[derive(Default)]
pub struct Overrides {
    pub classifier: Option<Arc<dyn ImageClassifier>>,
    pub fetcher: Option<Arc<dyn ImageFetcher>>,
    pub sessions: Option<Arc<dyn SessionStore>>,
    pub login_driver: Option<Arc<dyn LoginDriver>>,
    pub database: Option<Database>,
}

/// The running service graph. Owns the live log channel and its expiry task.
pub struct Services {
    pub config: Config,
    pub channel: LogChannel,
    pub progress: JobProgressBroadcaster,
    pub registry: Arc<JobRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub gate: BrowserGate,
    pub review: Arc<SqliteReviewQueue>,
    pub pipeline: Arc<Pipeline>,
    pub handoff: CredentialHandoff,
    shutdown: CancellationToken,
    expiry: JoinHandle<()>,
}

/// File-backed session store, encrypted when a session key is configured.
pub fn session_store_from_config(config: &Config) -> Result<FileSessionStore, FlyerscanError> {
    let session = &config.session;
    let store = FileSessionStore::new(
        config.session_path(),
        Duration::from_millis(session.io_timeout_ms),
    );

    let key = resolve_secret_optional(
        session.encryption_key.as_deref(),
        session.encryption_key_file.as_deref(),
        session.encryption_key_env_var.as_deref(),
    )
    .map_err(SessionError::from)?;

    Ok(match key {
        Some(key) => store.with_cipher(SessionCipher::from_secret(&key).map_err(SessionError::from)?),
        None => {
            log::debug!("No session key configured, cookie jar is stored in plain JSON");
            store
        }
    })
}

/// Review queue over the configured SQLite database.
pub fn review_queue_from_config(config: &Config) -> Result<SqliteReviewQueue, FlyerscanError> {
    let database = Database::open(&config.database_path())?;
    Ok(SqliteReviewQueue::new(
        database,
        DuplicatePolicy::from_allow(config.review.allow_duplicate_pending),
    ))
}

impl Services {
    /// Builds the service graph with the real classifier, fetcher, session
    /// store and database.
    pub fn build(config: Config, launcher: Arc<dyn BrowserLauncher>) -> Result<Self, FlyerscanError> {
        Self::build_with(config, launcher, Overrides::default())
    }

    /// Must be called inside a tokio runtime.
    pub fn build_with(
        config: Config,
        launcher: Arc<dyn BrowserLauncher>,
        overrides: Overrides,
    ) -> Result<Self, FlyerscanError> {
        let channel = LogChannel::new(LogChannelSettings::from(&config.log_channel));
        let progress = JobProgressBroadcaster::default();
        let registry = Arc::new(JobRegistry::new());
        let gate = BrowserGate::new(launcher);

        let sessions: Arc<dyn SessionStore> = match overrides.sessions {
            Some(s) => s,
            None => Arc::new(session_store_from_config(&config)?),
        };

        let classifier: Arc<dyn ImageClassifier> = match overrides.classifier {
            Some(c) => c,
            None => Arc::new(VisionClassifier::from_config(&config.classifier)?),
        };

        let fetcher: Arc<dyn ImageFetcher> = match overrides.fetcher {
            Some(f) => f,
            None => Arc::new(
                HttpImageFetcher::new(Duration::from_secs(
                    config.orchestrator.download_timeout_secs,
                ))
                .map_err(|e| ClassifyError::Config(format!("HTTP client: {}", e)))?,
            ),
        };

        let review = Arc::new(match overrides.database {
            Some(db) => SqliteReviewQueue::new(
                db,
                DuplicatePolicy::from_allow(config.review.allow_duplicate_pending),
            ),
            None => review_queue_from_config(&config)?,
        });

        let harvester =
            Harvester::from_config(gate.clone(), Arc::clone(&sessions), &config.harvest)?;
        let pool = ClassificationPool::from_config(fetcher, classifier, &config.orchestrator);
        let pipeline = Arc::new(
            Pipeline::new(
                harvester,
                pool,
                Arc::clone(&review) as Arc<dyn ReviewStore>,
                channel.clone(),
                Duration::from_secs(config.orchestrator.job_timeout_secs),
            )
            .with_registry(Arc::clone(&registry))
            .with_progress(progress.clone()),
        );

        let login_driver: Arc<dyn LoginDriver> = match overrides.login_driver {
            Some(d) => d,
            None => Arc::new(BrowserLoginDriver::from_config(
                gate.clone(),
                &config.handoff,
                &config.harvest,
            )),
        };
        let handoff = CredentialHandoff::new(
            channel.clone(),
            login_driver,
            Arc::clone(&sessions),
            Duration::from_secs(config.handoff.timeout_secs),
        );

        let shutdown = CancellationToken::new();
        let expiry = channel.spawn_expiry(
            Duration::from_secs(config.log_channel.sweep_interval_secs.max(1)),
            shutdown.clone(),
        );

        log::info!(
            "Services ready: {} classification workers, review store at {}",
            config.orchestrator.worker_count,
            config.database_path().display()
        );

        Ok(Self {
            config,
            channel,
            progress,
            registry,
            sessions,
            gate,
            review,
            pipeline,
            handoff,
            shutdown,
            expiry,
        })
    }

    /// Cancels running jobs and stops the log expiry task.
    pub async fn shutdown(self) {
        for job in self.registry.list() {
            if !job.is_finished() {
                self.registry.cancel(&job.id);
            }
        }
        self.shutdown.cancel();
        if let Err(e) = self.expiry.await {
            log::error!("Log expiry task failed: {}", e);
        }
    }
}
