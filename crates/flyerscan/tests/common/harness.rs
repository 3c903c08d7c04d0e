//! Isolated service graph for integration tests.
//!
//! `TestHarness` wires the real pipeline, review queue and log channel to
//! the fakes in [`super::fakes`], with a SQLite file in a temp directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use flyerscan::app::{Overrides, Services};
use flyerscan::config::schema::Config;
use flyerscan::db::Database;
use flyerscan::harvest::{BrowserGate, Harvester};
use flyerscan::model::{CandidateFields, Classification, ShowFields, VenueFields};
use flyerscan::pipeline::Pipeline;
use flyerscan::review::ReviewStore;
use flyerscan::session::{MemorySessionStore, SessionStore};
use flyerscan::worker::ClassificationPool;

use super::fakes::{EchoFetcher, FakeLauncher, FakePage, ScriptedClassifier};

pub const EVENTS_URL: &str = "https://www.facebook.com/groups/nightowls/events";

/// A CDN-hosted image URL that passes the default harvest filter.
pub fn cdn(n: usize) -> String {
    format!("https://scontent-lax3-1.xx.fbcdn.net/v/t39.30808-6/{}_n.jpg", n)
}

pub fn show(venue: &str, day: &str) -> Classification {
    Classification::new(
        CandidateFields::Show(ShowFields {
            title: Some(format!("{} Social", day)),
            venue_name: venue.to_string(),
            day: Some(day.to_string()),
            start_time: Some("9pm".to_string()),
            city: Some("Los Angeles".to_string()),
            state: Some("CA".to_string()),
            ..ShowFields::default()
        }),
        0.9,
    )
}

pub fn venue(name: &str) -> Classification {
    Classification::new(
        CandidateFields::Venue(VenueFields {
            name: name.to_string(),
            city: Some("Los Angeles".to_string()),
            ..VenueFields::default()
        }),
        0.8,
    )
}

/// An events page with `count` flyer images and a group header.
pub fn events_page(count: usize) -> FakePage {
    FakePage {
        header_text: "Night Owls Collective | Facebook\nEvents".to_string(),
        body_text: "Upcoming events".to_string(),
        initial_images: (0..count).map(cdn).collect(),
        ..FakePage::default()
    }
}

pub fn login_wall_page() -> FakePage {
    FakePage {
        landed_url: Some("https://www.facebook.com/login/?next=%2Fgroups%2Fnightowls".to_string()),
        body_text: "You must log in to continue.".to_string(),
        header_text: "Log in or sign up to view".to_string(),
        initial_images: (0..4).map(cdn).collect(),
        ..FakePage::default()
    }
}

/// Config tuned for fast tests: one short scroll, three workers, tiny
/// backoff.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.harvest.scroll_cycles = 1;
    config.harvest.scroll_wait_ms = 5;
    config.harvest.navigation_timeout_secs = 5;
    config.harvest.page_timeout_secs = 5;
    config.orchestrator.worker_count = 3;
    config.orchestrator.max_attempts = 2;
    config.orchestrator.initial_backoff_ms = 5;
    config.orchestrator.max_backoff_ms = 20;
    config.orchestrator.attempt_timeout_secs = 5;
    config.orchestrator.download_timeout_secs = 5;
    config.orchestrator.job_timeout_secs = 30;
    config.handoff.timeout_secs = 5;
    config.session.path = Some(dir.path().join("cookies.json").to_string_lossy().to_string());
    config.database.path = Some(dir.path().join("flyerscan.db").to_string_lossy().to_string());
    config
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub launcher: FakeLauncher,
    pub classifier: Arc<ScriptedClassifier>,
    pub sessions: Arc<MemorySessionStore>,
    pub services: Services,
}

impl TestHarness {
    pub fn new(page: FakePage, classifier: ScriptedClassifier) -> Self {
        Self::with_sessions(page, classifier, MemorySessionStore::new())
    }

    pub fn with_sessions(
        page: FakePage,
        classifier: ScriptedClassifier,
        sessions: MemorySessionStore,
    ) -> Self {
        Self::build(page, classifier, sessions, |_| {})
    }

    /// Like [`TestHarness::new`], with `tweak` applied to the test config.
    pub fn with_config(
        page: FakePage,
        classifier: ScriptedClassifier,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        Self::build(page, classifier, MemorySessionStore::new(), tweak)
    }

    fn build(
        page: FakePage,
        classifier: ScriptedClassifier,
        sessions: MemorySessionStore,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = test_config(&temp_dir);
        tweak(&mut config);

        let launcher = FakeLauncher::new(page);
        let classifier = Arc::new(classifier);
        let sessions = Arc::new(sessions);
        let database =
            Database::open(&config.database_path()).expect("Failed to open test database");

        let services = Services::build_with(
            config,
            Arc::new(launcher.clone()),
            Overrides {
                classifier: Some(Arc::clone(&classifier) as _),
                fetcher: Some(Arc::new(EchoFetcher::new())),
                sessions: Some(Arc::clone(&sessions) as Arc<dyn SessionStore>),
                login_driver: None,
                database: Some(database),
            },
        )
        .expect("Failed to build services");

        Self {
            temp_dir,
            launcher,
            classifier,
            sessions,
            services,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.services.pipeline
    }

    pub fn review(&self) -> &dyn ReviewStore {
        self.services.review.as_ref()
    }

    /// A second pipeline over the same browser and classifier, with its own
    /// review store and job time limit.
    pub fn custom_pipeline(
        &self,
        review: Arc<dyn ReviewStore>,
        job_timeout: Duration,
    ) -> Pipeline {
        let config = &self.services.config;
        let gate = BrowserGate::new(Arc::new(self.launcher.clone()));
        let harvester = Harvester::from_config(
            gate,
            Arc::clone(&self.sessions) as Arc<dyn SessionStore>,
            &config.harvest,
        )
        .expect("Failed to build harvester");
        let pool = ClassificationPool::from_config(
            Arc::new(EchoFetcher::new()),
            Arc::clone(&self.classifier) as _,
            &config.orchestrator,
        );
        Pipeline::new(
            harvester,
            pool,
            review,
            self.services.channel.clone(),
            job_timeout,
        )
    }
}
