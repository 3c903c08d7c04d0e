//! Event streaming: the `parser-logs` live channel, per-job transcripts and
//! job progress events.

pub mod job_log;
pub mod job_progress;
pub mod log_channel;

pub use job_log::JobLogger;
pub use job_progress::{
    JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker, JobStatus,
};
pub use log_channel::{
    ChannelEvent, ExpiryReason, LogChannel, LogChannelSettings, LogEntry, LogLevel,
    LogSubscription, PARSER_LOGS_TOPIC,
};
