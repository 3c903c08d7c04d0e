pub mod aggregate;
pub mod app;
pub mod auth;
pub mod broadcast;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod harvest;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod review;
pub mod sanitize;
pub mod secrets;
pub mod session;
pub mod telemetry;
pub mod worker;

pub use aggregate::aggregate;
pub use app::{Overrides, Services};
pub use auth::{CredentialHandoff, Credentials, HandoffError};
pub use broadcast::{ChannelEvent, JobLogger, JobPhase, JobProgressBroadcaster, LogChannel};
pub use classify::{ImageClassifier, VisionClassifier};
pub use config::{load_config, Config};
pub use error::{
    ClassifyError, ConfigError, FetchError, FlyerscanError, HarvestError, Result, SessionError,
};
pub use harvest::{BrowserGate, BrowserLauncher, Harvester};
pub use jobs::{JobRegistry, ParseJob};
pub use model::{AggregatedDataset, Classification, ExtractionCandidate, ImageRef};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use resolve::resolve;
pub use review::{ReviewRecord, ReviewStatus, ReviewStore, SqliteReviewQueue};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, SessionCipher};
pub use session::{FileSessionStore, SessionStore, StoredSession};
pub use worker::{ClassificationPool, ImageFetcher};
