use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub log_channel: LogChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            harvest: HarvestConfig::default(),
            classifier: ClassifierConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            log_channel: LogChannelConfig::default(),
            session: SessionConfig::default(),
            database: DatabaseConfig::default(),
            handoff: HandoffConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

/// `~/.flyerscan`, or `./.flyerscan` when no home directory is known.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flyerscan")
}

impl Config {
    pub fn session_path(&self) -> PathBuf {
        match &self.session.path {
            Some(p) => PathBuf::from(crate::secrets::expand_home(p)),
            None => default_base_dir().join("session").join("cookies.json"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(p) => PathBuf::from(crate::secrets::expand_home(p)),
            None => default_base_dir().join("data").join("flyerscan.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Harvest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestConfig {
    #[serde(default = "default_scroll_cycles")]
    pub scroll_cycles: u32,
    #[serde(default = "default_scroll_wait_ms")]
    pub scroll_wait_ms: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    /// Limit for each browser call after navigation (scan, scroll, read).
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Image URLs must match at least one of these.
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub login_wall: LoginWallConfig,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_executable: Option<String>,
}

fn default_scroll_cycles() -> u32 {
    5
}

fn default_scroll_wait_ms() -> u64 {
    1500
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_page_timeout_secs() -> u64 {
    15
}

fn default_max_images() -> usize {
    200
}

fn default_include_patterns() -> Vec<String> {
    vec![
        r"^https://scontent[^/]*\.fbcdn\.net/".to_string(),
        r"^https://[^/]*\.cdninstagram\.com/".to_string(),
    ]
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        r"/rsrc\.php/".to_string(),
        r"/emoji\.php/".to_string(),
        r"\.svg(\?|$)".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            scroll_cycles: default_scroll_cycles(),
            scroll_wait_ms: default_scroll_wait_ms(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            page_timeout_secs: default_page_timeout_secs(),
            max_images: default_max_images(),
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            login_wall: LoginWallConfig::default(),
            headless: true,
            chrome_executable: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginWallConfig {
    /// Substrings of the post-navigation URL that mean "login page".
    #[serde(default = "default_url_markers")]
    pub url_markers: Vec<String>,
    /// Case-insensitive phrases in the visible text of a login wall.
    #[serde(default = "default_text_markers")]
    pub text_markers: Vec<String>,
}

fn default_url_markers() -> Vec<String> {
    vec![
        "/login".to_string(),
        "/checkpoint".to_string(),
        "login.php".to_string(),
    ]
}

fn default_text_markers() -> Vec<String> {
    vec![
        "log in to continue".to_string(),
        "you must log in".to_string(),
        "log into facebook".to_string(),
    ]
}

impl Default for LoginWallConfig {
    fn default() -> Self {
        Self {
            url_markers: default_url_markers(),
            text_markers: default_text_markers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Direct API key (for local testing; prefer file or env var).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    800
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Total classification attempts per image, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_download_timeout_secs() -> u64 {
    20
}

fn default_job_timeout_secs() -> u64 {
    900
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Log channel, session, database, hand-off, review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogChannelConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_window_size() -> usize {
    50
}

fn default_retention_secs() -> u64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for LogChannelConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Cookie jar location. Defaults to `~/.flyerscan/session/cookies.json`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub encryption_key_file: Option<String>,
    #[serde(default)]
    pub encryption_key_env_var: Option<String>,
}

fn default_io_timeout_ms() -> u64 {
    2_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: None,
            io_timeout_ms: default_io_timeout_ms(),
            encryption_key: None,
            encryption_key_file: None,
            encryption_key_env_var: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.flyerscan/data/flyerscan.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffConfig {
    #[serde(default = "default_handoff_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_login_url")]
    pub login_url: String,
}

fn default_handoff_timeout_secs() -> u64 {
    300
}

fn default_login_url() -> String {
    "https://www.facebook.com/login".to_string()
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_handoff_timeout_secs(),
            login_url: default_login_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    /// Allow a second pending record for a URL that already has one.
    #[serde(default)]
    pub allow_duplicate_pending: bool,
}
