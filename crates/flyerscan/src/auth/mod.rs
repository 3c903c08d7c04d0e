//! Credential hand-off: turning a one-time `{identifier, secret}` submission
//! into a stored browser session.

pub mod driver;
pub mod handoff;

pub use driver::{BrowserLoginDriver, LoginDriver};
pub use handoff::CredentialHandoff;

use secrecy::SecretString;
use thiserror::Error;

use crate::error::{HarvestError, SessionError};

/// Login credentials. Consumed by the login attempt and dropped with it.
#[derive(Debug)]
pub struct Credentials {
    pub identifier: String,
    pub secret: SecretString,
}

#[derive(Error, Debug)]
pub enum HandoffError {
    /// No open request has this id. Request ids are single-use.
    #[error("No open credential request '{0}'")]
    UnknownRequest(String),

    #[error("Another credential request is already open ({0})")]
    Busy(String),

    #[error("Credential request '{request_id}' expired after {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: std::time::Duration,
    },

    #[error("Identifier must not be empty")]
    EmptyIdentifier,

    #[error("Login was not accepted: {0}")]
    Rejected(String),

    #[error("Login attempt failed: {0}")]
    Browser(#[from] HarvestError),

    #[error("Failed to store the new session: {0}")]
    Session(#[from] SessionError),
}
