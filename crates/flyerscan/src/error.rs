use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlyerscanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Review queue error: {0}")]
    Review(#[from] crate::review::ReviewError),

    #[error("Credential hand-off error: {0}")]
    Handoff(#[from] crate::auth::HandoffError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Classifier error: {0}")]
    Classify(#[from] ClassifyError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid pattern '{pattern}' in {field}: {reason}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        reason: String,
    },
}

/// Errors from the session store. Absence of a session is not an error.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session store I/O on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Failed to encode session: {0}")]
    Encode(String),

    #[error("Session encryption failed: {0}")]
    Crypto(#[from] crate::secrets::SecretError),
}

/// Errors raised while driving the browser.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// The page is a login wall; a fresh login is required.
    #[error("Login required to view '{url}'")]
    AuthRequired { url: String },

    #[error("Navigation to '{url}' timed out after {timeout:?}")]
    NavigationTimeout {
        url: String,
        timeout: std::time::Duration,
    },

    /// A browser call after navigation stalled.
    #[error("Browser {operation} did not finish within {timeout:?}")]
    OperationTimeout {
        operation: &'static str,
        timeout: std::time::Duration,
    },

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser operation failed: {0}")]
    Browser(String),

    #[error("Harvest cancelled")]
    Cancelled,
}

/// Errors raised by an image classifier.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// Transient: the model endpoint is down, overloaded or timed out.
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    /// Permanent: the input was refused (malformed image, unsupported type).
    #[error("Classifier rejected input: {0}")]
    Rejected(String),

    /// Permanent: the model answered but not in the expected structure.
    #[error("Unparseable classifier result: {0}")]
    Unparseable(String),

    #[error("Classifier misconfigured: {0}")]
    Config(String),
}

impl ClassifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClassifyError::Unavailable(_))
    }
}

/// Errors while downloading image bytes.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request for '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    #[error("'{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("'{url}' returned an empty body")]
    Empty { url: String },
}

pub type Result<T> = std::result::Result<T, FlyerscanError>;
