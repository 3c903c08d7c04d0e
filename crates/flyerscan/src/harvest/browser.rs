//! Contract a headless browser driver has to satisfy.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::HarvestError;
use crate::session::SessionCookie;

/// Starts a fresh browser session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, HarvestError>;
}

/// One live browser (one tab). Callers hold it exclusively.
#[async_trait]
pub trait BrowserSession: Send {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), HarvestError>;

    /// Loads `url` and waits for the initial document. Callers apply their
    /// own timeout.
    async fn navigate(&mut self, url: &str) -> Result<(), HarvestError>;

    /// URL after redirects.
    async fn current_url(&mut self) -> Result<String, HarvestError>;

    /// Visible body text, used for login-wall detection.
    async fn visible_text(&mut self) -> Result<String, HarvestError>;

    /// Title and heading text of the page header region.
    async fn header_text(&mut self) -> Result<String, HarvestError>;

    /// `src` of every image element currently in the document.
    async fn image_sources(&mut self) -> Result<Vec<String>, HarvestError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), HarvestError>;

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, HarvestError>;

    /// Fills and submits the login form at `login_url`.
    async fn submit_login(
        &mut self,
        login_url: &str,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<(), HarvestError>;

    /// Shuts the browser down. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), HarvestError>;
}

/// Awaits one browser call for at most `limit`.
pub async fn within<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, HarvestError>>,
) -> Result<T, HarvestError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(HarvestError::OperationTimeout {
            operation,
            timeout: limit,
        }),
    }
}

/// Placeholder left behind once a real session has been handed off for
/// closing.
pub(crate) struct ClosedSession;

fn closed() -> HarvestError {
    HarvestError::Browser("browser session already closed".to_string())
}

#[async_trait]
impl BrowserSession for ClosedSession {
    async fn set_cookies(&mut self, _cookies: &[SessionCookie]) -> Result<(), HarvestError> {
        Err(closed())
    }

    async fn navigate(&mut self, _url: &str) -> Result<(), HarvestError> {
        Err(closed())
    }

    async fn current_url(&mut self) -> Result<String, HarvestError> {
        Err(closed())
    }

    async fn visible_text(&mut self) -> Result<String, HarvestError> {
        Err(closed())
    }

    async fn header_text(&mut self) -> Result<String, HarvestError> {
        Err(closed())
    }

    async fn image_sources(&mut self) -> Result<Vec<String>, HarvestError> {
        Err(closed())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), HarvestError> {
        Err(closed())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, HarvestError> {
        Err(closed())
    }

    async fn submit_login(
        &mut self,
        _login_url: &str,
        _identifier: &str,
        _secret: &SecretString,
    ) -> Result<(), HarvestError> {
        Err(closed())
    }

    async fn close(&mut self) -> Result<(), HarvestError> {
        Ok(())
    }
}

/// Launcher for builds without a browser driver. Every launch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

#[async_trait]
impl BrowserLauncher for NoBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, HarvestError> {
        Err(HarvestError::Launch(
            "no browser driver compiled in (enable the `chromium` feature)".to_string(),
        ))
    }
}
