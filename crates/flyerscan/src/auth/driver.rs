use std::time::Duration;

use async_trait::async_trait;

use super::{Credentials, HandoffError};
use crate::config::{HandoffConfig, HarvestConfig};
use crate::error::HarvestError;
use crate::harvest::{within, BrowserGate, LoginWallDetector};
use crate::session::StoredSession;

/// Performs an interactive login and returns the resulting cookie jar.
#[async_trait]
pub trait LoginDriver: Send + Sync {
    async fn login(&self, credentials: Credentials) -> Result<StoredSession, HandoffError>;
}

/// Logs in through the shared browser, holding the gate like any harvest.
pub struct BrowserLoginDriver {
    gate: BrowserGate,
    login_url: String,
    login_wall: LoginWallDetector,
    navigation_timeout: Duration,
    page_timeout: Duration,
}

impl BrowserLoginDriver {
    pub fn new(
        gate: BrowserGate,
        login_url: &str,
        login_wall: LoginWallDetector,
        navigation_timeout: Duration,
        page_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            login_url: login_url.to_string(),
            login_wall,
            navigation_timeout,
            page_timeout,
        }
    }

    pub fn from_config(gate: BrowserGate, handoff: &HandoffConfig, harvest: &HarvestConfig) -> Self {
        Self::new(
            gate,
            &handoff.login_url,
            LoginWallDetector::new(&harvest.login_wall),
            Duration::from_secs(harvest.navigation_timeout_secs),
            Duration::from_secs(harvest.page_timeout_secs),
        )
    }
}

#[async_trait]
impl LoginDriver for BrowserLoginDriver {
    async fn login(&self, credentials: Credentials) -> Result<StoredSession, HandoffError> {
        if credentials.identifier.trim().is_empty() {
            return Err(HandoffError::EmptyIdentifier);
        }

        let mut session = self.gate.acquire().await?;

        let attempt = async {
            tokio::time::timeout(
                self.navigation_timeout,
                session.submit_login(&self.login_url, &credentials.identifier, &credentials.secret),
            )
            .await
            .map_err(|_| HarvestError::NavigationTimeout {
                url: self.login_url.clone(),
                timeout: self.navigation_timeout,
            })??;

            let landed = within("url read", self.page_timeout, session.current_url()).await?;
            let text = within("text read", self.page_timeout, session.visible_text()).await?;
            if self.login_wall.is_login_wall(&landed, &text) {
                return Err(HandoffError::Rejected(
                    "still on the login page after submitting".to_string(),
                ));
            }

            let cookies = within("cookie capture", self.page_timeout, session.cookies()).await?;
            if cookies.is_empty() {
                return Err(HandoffError::Rejected(
                    "no cookies were issued".to_string(),
                ));
            }
            Ok::<_, HandoffError>(StoredSession::new(cookies))
        }
        .await;
        drop(credentials);

        match tokio::time::timeout(self.page_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Browser did not close cleanly after login: {}", e),
            Err(_) => log::warn!("Browser did not close within {:?} after login", self.page_timeout),
        }

        let stored = attempt?;
        log::info!("Login succeeded, {} cookies captured", stored.cookies.len());
        Ok(stored)
    }
}
