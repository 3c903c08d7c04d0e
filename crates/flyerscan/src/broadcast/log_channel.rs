//! Live log channel for the `parser-logs` topic.
//!
//! Keeps a short, bounded window of recent entries for "live tail"
//! subscribers. New subscribers get the window as a backlog snapshot, then
//! live entries, then expiry notices when entries age out. The permanent
//! per-job transcript is kept separately by [`JobLogger`](super::JobLogger).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fixed topic name the channel publishes under.
pub const PARSER_LOGS_TOPIC: &str = "parser-logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Why an entry left the live window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// Older than the retention window.
    Aged,
    /// Pushed out by newer entries once the window was full.
    Evicted,
}

/// Everything a `parser-logs` subscriber can receive after its backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelEvent {
    Entry {
        entry: LogEntry,
    },
    Expired {
        ids: Vec<u64>,
        reason: ExpiryReason,
    },
    /// A job hit a login wall and needs an admin to log in.
    #[serde(rename_all = "camelCase")]
    AuthRequired { job_id: String, url: String },
    /// The credential hand-off is waiting for a submission.
    #[serde(rename_all = "camelCase")]
    AwaitingCredentials {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        expires_at: DateTime<Utc>,
    },
    /// A credential request finished (success, failure or timeout).
    #[serde(rename_all = "camelCase")]
    CredentialsResolved { request_id: String, outcome: String },
}

/// Retention settings for the live window.
#[derive(Debug, Clone, Copy)]
pub struct LogChannelSettings {
    /// Maximum number of entries kept for live tail.
    pub window_size: usize,
    /// How long an entry stays in the live window.
    pub retention: Duration,
    /// Capacity of the underlying broadcast channel.
    pub capacity: usize,
}

impl Default for LogChannelSettings {
    fn default() -> Self {
        Self {
            window_size: 50,
            retention: Duration::from_secs(120),
            capacity: 1024,
        }
    }
}

struct Inner {
    settings: LogChannelSettings,
    window: Mutex<VecDeque<LogEntry>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<ChannelEvent>,
}

/// Publish/subscribe surface for pipeline logs.
///
/// Cloning is cheap and every clone shares the same window. The window and
/// the broadcast send are updated under one lock so a subscriber's backlog
/// and its live stream never overlap or leave a gap.
#[derive(Clone)]
pub struct LogChannel {
    inner: Arc<Inner>,
}

impl LogChannel {
    pub fn new(settings: LogChannelSettings) -> Self {
        let (sender, _) = broadcast::channel(settings.capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                settings: LogChannelSettings {
                    window_size: settings.window_size.max(1),
                    ..settings
                },
                window: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    pub fn topic(&self) -> &'static str {
        PARSER_LOGS_TOPIC
    }

    pub fn settings(&self) -> LogChannelSettings {
        self.inner.settings
    }

    fn lock_window(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        match self.inner.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Log channel window lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Appends an entry to the live window and fans it out to subscribers.
    pub fn publish(&self, level: LogLevel, message: &str, job_id: Option<&str>) -> LogEntry {
        let mut window = self.lock_window();

        // Ids are assigned under the lock so the window stays in id order.
        let entry = LogEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            job_id: job_id.map(str::to_string),
        };
        window.push_back(entry.clone());

        let mut evicted = Vec::new();
        while window.len() > self.inner.settings.window_size {
            if let Some(old) = window.pop_front() {
                evicted.push(old.id);
            }
        }

        // No active receivers is fine.
        let _ = self.inner.sender.send(ChannelEvent::Entry {
            entry: entry.clone(),
        });
        if !evicted.is_empty() {
            let _ = self.inner.sender.send(ChannelEvent::Expired {
                ids: evicted,
                reason: ExpiryReason::Evicted,
            });
        }

        entry
    }

    /// Sends a non-log event (auth and credential notices) to subscribers.
    pub fn notify(&self, event: ChannelEvent) {
        let _window = self.lock_window();
        let _ = self.inner.sender.send(event);
    }

    pub fn info(&self, message: &str) -> LogEntry {
        self.publish(LogLevel::Info, message, None)
    }

    pub fn warn(&self, message: &str) -> LogEntry {
        self.publish(LogLevel::Warn, message, None)
    }

    pub fn error(&self, message: &str) -> LogEntry {
        self.publish(LogLevel::Error, message, None)
    }

    /// Joins the topic: returns the current window plus a live receiver.
    pub fn subscribe(&self) -> LogSubscription {
        let window = self.lock_window();
        let receiver = self.inner.sender.subscribe();
        LogSubscription {
            backlog: window.iter().cloned().collect(),
            receiver,
        }
    }

    /// Current contents of the live window, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock_window().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_window().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries older than the retention window as of `now` and
    /// notifies subscribers. Returns the expired ids.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<u64> {
        let retention = match chrono::Duration::from_std(self.inner.settings.retention) {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };

        let mut window = self.lock_window();
        let mut expired = Vec::new();
        window.retain(|entry| {
            let keep = entry.timestamp + retention > now;
            if !keep {
                expired.push(entry.id);
            }
            keep
        });

        if !expired.is_empty() {
            let _ = self.inner.sender.send(ChannelEvent::Expired {
                ids: expired.clone(),
                reason: ExpiryReason::Aged,
            });
        }

        expired
    }

    /// Runs [`expire_stale`](Self::expire_stale) every `interval` until
    /// `shutdown` is cancelled.
    pub fn spawn_expiry(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = channel.expire_stale(Utc::now());
                        if !expired.is_empty() {
                            log::debug!("Expired {} live log entries", expired.len());
                        }
                    }
                }
            }
        })
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(LogChannelSettings::default())
    }
}

/// A subscriber's view of the topic.
pub struct LogSubscription {
    /// Entries that were live when the subscriber joined.
    pub backlog: Vec<LogEntry>,
    receiver: broadcast::Receiver<ChannelEvent>,
}

impl LogSubscription {
    /// Waits for the next live event. Returns `None` once the channel is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Log subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
