//! In-process stand-ins for the browser, the image host, the vision model
//! and the review store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use flyerscan::classify::ImageClassifier;
use flyerscan::db::DatabaseError;
use flyerscan::error::{ClassifyError, FetchError, HarvestError};
use flyerscan::harvest::{BrowserLauncher, BrowserSession};
use flyerscan::model::{AggregatedDataset, Classification};
use flyerscan::review::{CreateOutcome, PendingRecord, ReviewError, ReviewRecord, ReviewStore};
use flyerscan::session::SessionCookie;
use flyerscan::worker::{FetchedImage, ImageFetcher};

/// What the fake browser shows after navigation.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    /// URL after redirects. `None` keeps the requested URL.
    pub landed_url: Option<String>,
    pub body_text: String,
    pub header_text: String,
    /// Image sources present before any scrolling.
    pub initial_images: Vec<String>,
    /// Image sources that appear after the first scroll.
    pub lazy_images: Vec<String>,
    pub navigation_delay: Duration,
    /// How long every image scan stalls before answering.
    pub scan_delay: Duration,
    /// Password the login form accepts.
    pub accepted_password: Option<String>,
}

#[derive(Default)]
struct BrowserStats {
    launched: AtomicUsize,
    open: AtomicUsize,
    navigations: AtomicUsize,
    cookies_restored: Mutex<Vec<SessionCookie>>,
}

/// Launches [`FakeBrowser`] sessions over a shared [`FakePage`].
#[derive(Clone)]
pub struct FakeLauncher {
    page: Arc<Mutex<FakePage>>,
    stats: Arc<BrowserStats>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Arc::new(Mutex::new(page)),
            stats: Arc::new(BrowserStats::default()),
        }
    }

    pub fn set_page(&self, page: FakePage) {
        *self.page.lock().unwrap() = page;
    }

    pub fn launched(&self) -> usize {
        self.stats.launched.load(Ordering::SeqCst)
    }

    /// Sessions launched and not closed yet.
    pub fn open_sessions(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.stats.navigations.load(Ordering::SeqCst)
    }

    pub fn cookies_restored(&self) -> Vec<SessionCookie> {
        self.stats.cookies_restored.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, HarvestError> {
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        self.stats.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            page: self.page.lock().unwrap().clone(),
            stats: Arc::clone(&self.stats),
            location: String::new(),
            scrolled: false,
            logged_in: false,
            closed: false,
        }))
    }
}

pub struct FakeBrowser {
    page: FakePage,
    stats: Arc<BrowserStats>,
    location: String,
    scrolled: bool,
    logged_in: bool,
    closed: bool,
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), HarvestError> {
        self.stats
            .cookies_restored
            .lock()
            .unwrap()
            .extend_from_slice(cookies);
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), HarvestError> {
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        if !self.page.navigation_delay.is_zero() {
            tokio::time::sleep(self.page.navigation_delay).await;
        }
        self.location = url.to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, HarvestError> {
        if self.logged_in {
            return Ok("https://www.facebook.com/".to_string());
        }
        Ok(self
            .page
            .landed_url
            .clone()
            .unwrap_or_else(|| self.location.clone()))
    }

    async fn visible_text(&mut self) -> Result<String, HarvestError> {
        if self.logged_in {
            return Ok("Welcome back".to_string());
        }
        Ok(self.page.body_text.clone())
    }

    async fn header_text(&mut self) -> Result<String, HarvestError> {
        Ok(self.page.header_text.clone())
    }

    async fn image_sources(&mut self) -> Result<Vec<String>, HarvestError> {
        if !self.page.scan_delay.is_zero() {
            tokio::time::sleep(self.page.scan_delay).await;
        }
        let mut sources = self.page.initial_images.clone();
        if self.scrolled {
            sources.extend(self.page.lazy_images.iter().cloned());
        }
        Ok(sources)
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), HarvestError> {
        self.scrolled = true;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, HarvestError> {
        if self.logged_in {
            Ok(vec![
                SessionCookie::new("c_user", "1000", ".facebook.com"),
                SessionCookie::new("xs", "session-token", ".facebook.com"),
            ])
        } else {
            Ok(Vec::new())
        }
    }

    async fn submit_login(
        &mut self,
        login_url: &str,
        _identifier: &str,
        secret: &SecretString,
    ) -> Result<(), HarvestError> {
        self.location = login_url.to_string();
        self.logged_in = self.page.accepted_password.as_deref() == Some(secret.expose_secret());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), HarvestError> {
        if !self.closed {
            self.closed = true;
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Serves an image whose bytes are its own URL, so the classifier can tell
/// images apart.
#[derive(Default)]
pub struct EchoFetcher {
    missing: Vec<String>,
}

impl EchoFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs that answer 404.
    pub fn with_missing(missing: Vec<String>) -> Self {
        Self { missing }
    }
}

#[async_trait]
impl ImageFetcher for EchoFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        if self.missing.iter().any(|m| m == url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(FetchedImage {
            bytes: url.as_bytes().to_vec(),
            mime_type: "image/jpeg".to_string(),
        })
    }
}

/// Scripted model answer for one image.
#[derive(Debug, Clone)]
pub enum Answer {
    Flyer(Classification),
    NotFlyer,
    /// Transient failure on every attempt.
    Down,
    Refused,
    Garbled,
}

/// Vision model stand-in keyed by image URL. Unknown images are not flyers.
#[derive(Default)]
pub struct ScriptedClassifier {
    answers: HashMap<String, Answer>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, url: &str, answer: Answer) -> Self {
        self.answers.insert(url.to_string(), answer);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<Option<Classification>, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let url = String::from_utf8_lossy(image).to_string();
        match self.answers.get(&url) {
            Some(Answer::Flyer(c)) => Ok(Some(c.clone())),
            Some(Answer::NotFlyer) | None => Ok(None),
            Some(Answer::Down) => Err(ClassifyError::Unavailable("503 from model".into())),
            Some(Answer::Refused) => Err(ClassifyError::Rejected("corrupt image".into())),
            Some(Answer::Garbled) => Err(ClassifyError::Unparseable("not json".into())),
        }
    }
}

/// Review store whose writes always fail.
#[derive(Default)]
pub struct UnwritableReviewStore {
    attempts: AtomicUsize,
}

impl UnwritableReviewStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ReviewStore for UnwritableReviewStore {
    fn create_pending(&self, _record: &PendingRecord) -> Result<CreateOutcome, ReviewError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ReviewError::Database(DatabaseError::LockPoisoned))
    }

    fn get(&self, _job_id: &str) -> Result<Option<ReviewRecord>, ReviewError> {
        Ok(None)
    }

    fn list_pending(&self) -> Result<Vec<ReviewRecord>, ReviewError> {
        Ok(Vec::new())
    }

    fn approve(
        &self,
        job_id: &str,
        _edited: Option<AggregatedDataset>,
    ) -> Result<ReviewRecord, ReviewError> {
        Err(ReviewError::NotFound(job_id.to_string()))
    }

    fn reject(&self, job_id: &str, _reason: &str) -> Result<ReviewRecord, ReviewError> {
        Err(ReviewError::NotFound(job_id.to_string()))
    }
}
