use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::browser::within;
use super::filter::ImageFilter;
use super::gate::{BrowserGate, ExclusiveSession};
use super::login_wall::LoginWallDetector;
use crate::broadcast::JobLogger;
use crate::config::HarvestConfig;
use crate::error::{ConfigError, HarvestError};
use crate::model::ImageRef;
use crate::sanitize::redact_url;
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy)]
pub struct HarvestSettings {
    pub scroll_cycles: u32,
    pub scroll_wait: Duration,
    pub navigation_timeout: Duration,
    /// Limit for every browser call other than navigation.
    pub page_timeout: Duration,
}

impl From<&HarvestConfig> for HarvestSettings {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            scroll_cycles: config.scroll_cycles.max(1),
            scroll_wait: Duration::from_millis(config.scroll_wait_ms),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            page_timeout: Duration::from_secs(config.page_timeout_secs),
        }
    }
}

/// What one page yielded.
#[derive(Debug, Clone)]
pub struct HarvestResult {
    pub images: Vec<ImageRef>,
    pub header_text: String,
    /// Raw image elements seen before filtering.
    pub discovered: usize,
}

/// Drives one exclusive browser session per page.
pub struct Harvester {
    gate: BrowserGate,
    sessions: Arc<dyn SessionStore>,
    filter: ImageFilter,
    login_wall: LoginWallDetector,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(
        gate: BrowserGate,
        sessions: Arc<dyn SessionStore>,
        filter: ImageFilter,
        login_wall: LoginWallDetector,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            gate,
            sessions,
            filter,
            login_wall,
            settings,
        }
    }

    pub fn from_config(
        gate: BrowserGate,
        sessions: Arc<dyn SessionStore>,
        config: &HarvestConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            gate,
            sessions,
            ImageFilter::from_config(config)?,
            LoginWallDetector::new(&config.login_wall),
            HarvestSettings::from(config),
        ))
    }

    pub fn gate(&self) -> &BrowserGate {
        &self.gate
    }

    /// Collects CDN image URLs and header text from `url`.
    ///
    /// The browser is closed before this returns, whatever the outcome.
    pub async fn harvest(
        &self,
        url: &str,
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> Result<HarvestResult, HarvestError> {
        let cookies = match self.sessions.load().await {
            Ok(Some(stored)) => {
                let live = stored.live_cookies(Utc::now());
                logger.info(&format!("Restoring stored session ({} cookies)", live.len()));
                live
            }
            Ok(None) => {
                logger.info("No stored session, browsing anonymously");
                Vec::new()
            }
            Err(e) => {
                logger.warn(&format!("Could not load stored session: {}", e));
                Vec::new()
            }
        };

        let mut session = tokio::select! {
            _ = cancel.cancelled() => return Err(HarvestError::Cancelled),
            acquired = self.gate.acquire() => acquired?,
        };

        let result = self
            .drive(&mut session, url, &cookies, logger, cancel)
            .await;

        // A close that stalls is abandoned; the session's drop fallback
        // still releases the gate.
        match tokio::time::timeout(self.settings.page_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => logger.warn(&format!("Browser did not close cleanly: {}", e)),
            Err(_) => logger.warn(&format!(
                "Browser did not close within {:?}, abandoning it",
                self.settings.page_timeout
            )),
        }

        result
    }

    /// Runs one browser call under the page timeout, giving up as soon as
    /// the job is cancelled.
    async fn step<T>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, HarvestError>>,
    ) -> Result<T, HarvestError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(HarvestError::Cancelled),
            result = within(operation, self.settings.page_timeout, call) => result,
        }
    }

    async fn drive(
        &self,
        session: &mut ExclusiveSession,
        url: &str,
        cookies: &[crate::session::SessionCookie],
        logger: &JobLogger,
        cancel: &CancellationToken,
    ) -> Result<HarvestResult, HarvestError> {
        if !cookies.is_empty() {
            self.step("cookie restore", cancel, session.set_cookies(cookies)).await?;
        }

        logger.info(&format!("Navigating to {}", redact_url(url)));
        let navigation = tokio::time::timeout(self.settings.navigation_timeout, session.navigate(url));
        tokio::select! {
            _ = cancel.cancelled() => return Err(HarvestError::Cancelled),
            outcome = navigation => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    return Err(HarvestError::NavigationTimeout {
                        url: redact_url(url),
                        timeout: self.settings.navigation_timeout,
                    })
                }
            },
        }

        let landed = self.step("url read", cancel, session.current_url()).await?;
        let body = self.step("text read", cancel, session.visible_text()).await?;
        if self.login_wall.is_login_wall(&landed, &body) {
            return Err(HarvestError::AuthRequired {
                url: redact_url(url),
            });
        }

        let header_text = self.step("header read", cancel, session.header_text()).await?;

        let mut all_sources = self
            .step("image scan", cancel, session.image_sources())
            .await?;
        let mut last_count = all_sources.len();
        logger.info(&format!("Initial scan found {} image elements", last_count));

        for cycle in 1..=self.settings.scroll_cycles {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            self.step("scroll", cancel, session.scroll_to_bottom()).await?;
            tokio::select! {
                _ = cancel.cancelled() => return Err(HarvestError::Cancelled),
                _ = tokio::time::sleep(self.settings.scroll_wait) => {}
            }

            let sources = self
                .step("image scan", cancel, session.image_sources())
                .await?;
            let count = sources.len();
            logger.info(&format!(
                "Scroll {}/{}: {} image elements ({:+})",
                cycle,
                self.settings.scroll_cycles,
                count,
                count as i64 - last_count as i64
            ));
            last_count = count;
            all_sources.extend(sources);
        }

        let discovered = {
            let mut unique: Vec<&String> = all_sources.iter().collect();
            unique.sort();
            unique.dedup();
            unique.len()
        };
        let images = self.filter.apply(all_sources);
        logger.info(&format!(
            "Harvested {} flyer images ({} distinct image elements seen)",
            images.len(),
            discovered
        ));

        Ok(HarvestResult {
            images,
            header_text,
            discovered,
        })
    }
}
