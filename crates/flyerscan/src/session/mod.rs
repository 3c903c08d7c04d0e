//! Persistence of the scraping identity's browser cookies.
//!
//! A missing session is not an error: `load` returns `Ok(None)` and the
//! caller treats that as "fresh login required".

mod file;
mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// One browser cookie.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Unix seconds; `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl SessionCookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_cookie_path(),
            expires: None,
            http_only: true,
            secure: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires
            .is_some_and(|exp| exp > 0.0 && exp < now.timestamp() as f64)
    }
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .finish()
    }
}

/// The persisted cookie jar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub cookies: Vec<SessionCookie>,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self {
            cookies,
            saved_at: Utc::now(),
        }
    }

    /// Cookies that have not expired as of `now`.
    pub fn live_cookies(&self, now: DateTime<Utc>) -> Vec<SessionCookie> {
        self.cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredSession>, SessionError>;
    async fn save(&self, session: &StoredSession) -> Result<(), SessionError>;
    async fn clear(&self) -> Result<(), SessionError>;
}
