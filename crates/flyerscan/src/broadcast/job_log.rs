//! Per-job logger: every line goes to the live channel, to the job's
//! permanent transcript and to `tracing`.

use std::sync::{Arc, Mutex};

use super::log_channel::{LogChannel, LogEntry, LogLevel};

#[derive(Clone)]
pub struct JobLogger {
    job_id: String,
    channel: LogChannel,
    transcript: Arc<Mutex<Vec<LogEntry>>>,
}

impl JobLogger {
    pub fn new(job_id: &str, channel: LogChannel) -> Self {
        Self {
            job_id: job_id.to_string(),
            channel,
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn channel(&self) -> &LogChannel {
        &self.channel
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(job_id = %self.job_id, "{}", message),
            LogLevel::Info => tracing::info!(job_id = %self.job_id, "{}", message),
            LogLevel::Warn => tracing::warn!(job_id = %self.job_id, "{}", message),
            LogLevel::Error => tracing::error!(job_id = %self.job_id, "{}", message),
        }

        let entry = self.channel.publish(level, message, Some(&self.job_id));
        match self.transcript.lock() {
            Ok(mut transcript) => transcript.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Copy of everything logged so far, in order.
    pub fn transcript(&self) -> Vec<LogEntry> {
        match self.transcript.lock() {
            Ok(transcript) => transcript.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
