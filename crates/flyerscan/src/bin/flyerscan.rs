//! Administrative CLI: trigger parse jobs, review their results and manage
//! the scraping session.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use flyerscan::app::{review_queue_from_config, session_store_from_config};
use flyerscan::broadcast::{ChannelEvent, JobPhase};
use flyerscan::config::schema::default_base_dir;
use flyerscan::harvest::BrowserLauncher;
use flyerscan::model::AggregatedDataset;
use flyerscan::review::{ReviewRecord, ReviewStore};
use flyerscan::telemetry::{init_tracing, LogFormat};
use flyerscan::{load_config, resolve_secret, Config, FlyerscanError, Services};

#[derive(Parser, Debug)]
#[command(name = "flyerscan")]
#[command(about = "Harvest event flyers and queue them for review")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.flyerscan/config.json when present)
    #[arg(short, long, global = true, env = "FLYERSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Diagnostic log format: pretty or json
    #[arg(long, global = true, default_value = "pretty", env = "FLYERSCAN_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a parse job against an events page
    Parse {
        url: String,
        /// Return the job id at once and stream the live log until the job ends
        #[arg(long)]
        background: bool,
    },
    /// List records waiting for review
    Pending,
    /// Approve a pending record
    Approve {
        job_id: String,
        /// JSON file holding an edited dataset to store instead
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Reject a pending record
    Reject {
        job_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Log the scraping identity in and store its session
    Login(LoginArgs),
    /// Forget the stored session
    ClearSession,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    identifier: String,
    /// File holding the secret
    #[arg(long, conflicts_with = "secret_env")]
    secret_file: Option<String>,
    /// Environment variable holding the secret
    #[arg(long, default_value = "FLYERSCAN_SECRET")]
    secret_env: String,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Flyerscan(#[from] FlyerscanError),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job {job_id} ended as {state}")]
    JobEnded { job_id: String, state: String },

    #[error("Log channel closed before the credential request was published")]
    ChannelClosed,

    #[error("Login task failed: {0}")]
    LoginTask(#[from] tokio::task::JoinError),
}

fn launcher(config: &Config) -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "chromium")]
    {
        Arc::new(flyerscan::harvest::ChromiumLauncher::new(&config.harvest))
    }
    #[cfg(not(feature = "chromium"))]
    {
        let _ = config;
        Arc::new(flyerscan::harvest::NoBrowser)
    }
}

fn resolve_config(path: Option<&Path>) -> Result<Config, FlyerscanError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => {
            let default = default_base_dir().join("config.json");
            if default.exists() {
                Ok(load_config(&default)?)
            } else {
                log::debug!("No config file at {}, using defaults", default.display());
                Ok(Config::default())
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_record(record: &ReviewRecord) {
    println!(
        "{}  {:<14}  {:<24}  {} records  {}",
        record.id,
        record.status.label(),
        record.canonical_name,
        record.dataset.len(),
        record.url
    );
}

async fn parse(config: Config, url: &str, background: bool) -> Result<(), CliError> {
    let launcher = launcher(&config);
    let services = Services::build(config, launcher)?;
    let pipeline = Arc::clone(&services.pipeline);

    let result = if background {
        follow(&services, url).await
    } else {
        let job_id = uuid::Uuid::new_v4().to_string();
        let run = pipeline.run_job(&job_id, url);
        tokio::pin!(run);
        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling job {}", job_id);
                pipeline.cancel(&job_id);
                run.await
            }
        };
        match outcome {
            Ok(summary) => print_json(&summary),
            Err(e) => {
                if let Some(record) = e.pending_record() {
                    eprintln!("Dataset was not queued; it follows so it is not lost:");
                    print_json(&record.dataset)?;
                }
                Err(FlyerscanError::from(e).into())
            }
        }
    };

    services.shutdown().await;
    result
}

/// Submits the job, prints its id and tails `parser-logs` until it ends.
async fn follow(services: &Services, url: &str) -> Result<(), CliError> {
    let mut subscription = services.channel.subscribe();
    let mut progress = services.progress.subscribe();
    let job_id = services
        .pipeline
        .submit(url)
        .map_err(FlyerscanError::from)?;
    println!("{}", job_id);

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(ChannelEvent::Entry { entry }) if entry.job_id.as_deref() == Some(job_id.as_str()) => {
                    println!("{} {:<5} {}", entry.timestamp.format("%H:%M:%S"), entry.level, entry.message);
                }
                Some(ChannelEvent::AuthRequired { job_id: id, url }) if id == job_id => {
                    eprintln!("Login required for {}; run `flyerscan login`", url);
                }
                Some(_) => {}
                None => break,
            },
            update = progress.recv() => {
                if let Ok(update) = update {
                    if update.job_id == job_id && update.phase.is_terminal() {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling job {}", job_id);
                services.pipeline.cancel(&job_id);
            }
        }
    }

    match services.registry.get(&job_id) {
        Some(job) if job.state == JobPhase::PendingReview => {
            println!("Queued for review as {}", job_id);
            Ok(())
        }
        Some(job) => Err(CliError::JobEnded {
            job_id,
            state: job.error.unwrap_or_else(|| format!("{:?}", job.state)),
        }),
        None => Err(CliError::JobEnded {
            job_id,
            state: "unknown".to_string(),
        }),
    }
}

fn pending(config: &Config) -> Result<(), CliError> {
    let queue = review_queue_from_config(config)?;
    let records = queue.list_pending().map_err(FlyerscanError::from)?;
    if records.is_empty() {
        println!("No records pending review");
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn approve(config: &Config, job_id: &str, dataset: Option<&Path>) -> Result<(), CliError> {
    let edited = match dataset {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| CliError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
            Some(serde_json::from_str::<AggregatedDataset>(&content)?)
        }
        None => None,
    };

    let queue = review_queue_from_config(config)?;
    let record = queue
        .approve(job_id, edited)
        .map_err(FlyerscanError::from)?;
    print_record(&record);
    Ok(())
}

fn reject(config: &Config, job_id: &str, reason: &str) -> Result<(), CliError> {
    let queue = review_queue_from_config(config)?;
    let record = queue
        .reject(job_id, reason)
        .map_err(FlyerscanError::from)?;
    print_record(&record);
    Ok(())
}

async fn login(config: Config, args: LoginArgs) -> Result<(), CliError> {
    let secret = resolve_secret(
        None,
        args.secret_file.as_deref(),
        Some(args.secret_env.as_str()),
    )
    .map_err(FlyerscanError::from)?;

    let launcher = launcher(&config);
    let services = Services::build(config, launcher)?;
    let mut subscription = services.channel.subscribe();

    let handoff = services.handoff.clone();
    let request = tokio::spawn(async move { handoff.request_login(None).await });

    let result = loop {
        match subscription.recv().await {
            Some(ChannelEvent::AwaitingCredentials { request_id, .. }) => {
                break services
                    .handoff
                    .submit(&request_id, &args.identifier, secret)
                    .map_err(|e| CliError::from(FlyerscanError::from(e)));
            }
            Some(_) => continue,
            None => break Err(CliError::ChannelClosed),
        }
    };

    let result = match result {
        Ok(()) => match request.await {
            Ok(Ok(session)) => {
                println!("Session stored ({} cookies)", session.cookies.len());
                Ok(())
            }
            Ok(Err(e)) => Err(FlyerscanError::from(e).into()),
            Err(join) => Err(join.into()),
        },
        Err(e) => {
            request.abort();
            Err(e)
        }
    };

    services.shutdown().await;
    result
}

async fn clear_session(config: &Config) -> Result<(), CliError> {
    let store = session_store_from_config(config)?;
    flyerscan::session::SessionStore::clear(&store)
        .await
        .map_err(FlyerscanError::from)?;
    println!("Session cleared");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Parse { url, background } => parse(config, &url, background).await,
        Command::Pending => pending(&config),
        Command::Approve { job_id, dataset } => approve(&config, &job_id, dataset.as_deref()),
        Command::Reject { job_id, reason } => reject(&config, &job_id, &reason),
        Command::Login(args) => login(config, args).await,
        Command::ClearSession => clear_session(&config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
