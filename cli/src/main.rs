//! Outbound Relay - scheduled entry point for the relay engine.
//!
//! Without arguments this performs exactly one run and exits, which is what a
//! platform timer (cron, container job, function trigger) should invoke. With
//! `--daily-at HH:MM` the process stays up and fires a run every day at that
//! local time.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use clap::Parser;
use engine::{
    EngineError, GraphMailer, NotificationOutcome, Notifier, ObjectHandle, ObjectStoreDestination,
    ObjectStoreSource, ProgressCallback, RelayConfig, RelayJob, RunReport, RunSummary,
    SourceLocation, StoreError, TransferRecord, TransferStatus,
};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

const EXIT_OK: u8 = 0;
const EXIT_FILES_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_NOTIFICATION: u8 = 3;
const EXIT_FATAL: u8 = 4;

/// Outbound Relay - move outbound files from Azure Blob Storage to GCS
#[derive(Parser, Debug)]
#[command(name = "outbound-relay")]
#[command(version)]
#[command(about = "Relay outbound files to GCS, archive them, and email a report")]
struct Args {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Stay running and fire a run every day at this local time (e.g. 07:00)
    #[arg(long, value_name = "HH:MM")]
    daily_at: Option<String>,

    /// Print the run report as JSON to stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: String,
}

/// CLI implementation of ProgressCallback for a human-readable run summary
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, report: &RunReport, locations: &[SourceLocation]) {
        eprintln!("Starting relay run {}", report.run_id);
        for location in locations {
            eprintln!("  Prefix: {}/{}", location.container, location.prefix);
        }
        eprintln!();
    }

    fn on_prefix_planned(&self, location: &SourceLocation, objects: usize) {
        if self.verbose {
            eprintln!("{}: {} file(s) to transfer", location.prefix, objects);
        }
    }

    fn on_prefix_failed(&self, location: &SourceLocation, error: &StoreError) {
        eprintln!("{}: listing failed: {}", location.prefix, error);
    }

    fn on_object_started(&self, handle: &ObjectHandle) {
        if self.verbose {
            eprintln!("  Starting: {}", handle.path);
        }
    }

    fn on_object_completed(&self, record: &TransferRecord) {
        if self.verbose {
            eprintln!("  {}: {}", record.status, record.source_path);
        }
    }

    fn on_run_completed(&self, report: &RunReport) {
        eprintln!();
        eprintln!("Relay run complete!");

        let bytes: u64 = report.records().map(|r| r.bytes_transferred).sum();
        eprintln!(
            "Summary: {} processed, {} succeeded, {} failed",
            report.total_processed(),
            report.total_succeeded(),
            report.total_failed()
        );
        eprintln!("Bytes transferred: {}", Self::format_bytes(bytes));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if report.total_failed() > 0 {
            eprintln!();
            eprintln!("Failed files:");
            for record in report.records().filter(|r| r.status == TransferStatus::Failed) {
                let detail = record.error_detail.as_deref().unwrap_or("(unknown error)");
                eprintln!("  {}: {}", record.source_path, detail);
            }
        }

        let failed_prefixes: Vec<_> = report.failed_prefixes().collect();
        if !failed_prefixes.is_empty() {
            eprintln!();
            eprintln!("Prefixes not listed:");
            for group in failed_prefixes {
                eprintln!(
                    "  {}: {}",
                    group.prefix,
                    group.listing_error.as_deref().unwrap_or("(unknown error)")
                );
            }
        }
    }
}

fn setup_logging(verbose: bool, format: &str) -> Result<(), String> {
    let default_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format.to_lowercase().as_str() {
        "json" => subscriber.json().try_init().map_err(|e| e.to_string()),
        "text" => subscriber.try_init().map_err(|e| e.to_string()),
        other => Err(format!("Invalid log format '{}'. Must be 'text' or 'json'", other)),
    }
}

/// Load a dotenv file. An explicit path must exist; the default `.env` is optional.
fn load_environment(env_file: Option<&Path>) -> Result<(), String> {
    match env_file {
        Some(path) => dotenv::from_path(path)
            .map_err(|e| format!("Failed to load {}: {}", path.display(), e)),
        None => {
            dotenv::dotenv().ok();
            Ok(())
        }
    }
}

fn parse_daily_at(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| format!("Invalid time '{}'. Expected HH:MM, e.g. 07:00", value))
}

/// The first instant strictly after `now` whose local time is `at`.
fn next_fire<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        let candidate = date.and_time(at);
        // A time skipped by a DST jump resolves to None; fall through to the next day.
        if let Some(fire) = tz.from_local_datetime(&candidate).earliest() {
            if fire > *now {
                return fire;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
}

fn exit_code_for(result: &Result<RunSummary, EngineError>) -> u8 {
    match result {
        Ok(summary) if summary.report.has_failures() => EXIT_FILES_FAILED,
        Ok(_) => EXIT_OK,
        Err(EngineError::Notification { .. }) => EXIT_NOTIFICATION,
        Err(EngineError::Config(_)) => EXIT_CONFIG,
        Err(_) => EXIT_FATAL,
    }
}

fn report_of(result: &Result<RunSummary, EngineError>) -> Option<&RunReport> {
    match result {
        Ok(summary) => Some(&summary.report),
        Err(EngineError::Notification { report, .. }) => Some(&**report),
        Err(_) => None,
    }
}

/// One complete run: connect, transfer, notify.
async fn execute(args: &Args, config: &RelayConfig) -> anyhow::Result<u8> {
    let source = ObjectStoreSource::azure(&config.source).context("connecting to source storage")?;
    let destination =
        ObjectStoreDestination::gcs(&config.destination).context("connecting to destination bucket")?;
    let mailer = config.mail.as_ref().map(GraphMailer::new);

    let mut job = RelayJob::from_config(&source, &destination, config);
    if let (Some(mailer), Some(mail)) = (&mailer, &config.mail) {
        job = job.with_notifier(Notifier::new(mailer, mail));
    }

    let progress = CliProgress::new(args.verbose);
    let result = job.run(Some(&progress)).await;

    match &result {
        Ok(summary) => match &summary.notification {
            NotificationOutcome::Sent { recipient } => info!(%recipient, "run complete; report sent"),
            NotificationOutcome::SkippedEmpty => info!("run complete; nothing to report"),
            NotificationOutcome::SkippedUnconfigured => info!("run complete; report email disabled"),
        },
        Err(e) => error!(error = %e, "run complete but the report was not delivered"),
    }

    if args.json {
        if let Some(report) = report_of(&result) {
            let rendered = serde_json::to_string_pretty(report).context("serializing run report")?;
            println!("{}", rendered);
        }
    }

    Ok(exit_code_for(&result))
}

async fn run_once(args: &Args, config: &RelayConfig) -> u8 {
    match execute(args, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "run aborted");
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    }
}

/// Fire a run every day at `at`. Never returns.
async fn run_daily(args: &Args, config: &RelayConfig, at: NaiveTime) -> u8 {
    loop {
        let now = Local::now();
        let fire = next_fire(&now, at);
        info!(next_run = %fire.format("%Y-%m-%d %H:%M:%S %Z"), "waiting for next scheduled run");

        let wait = (fire - now).max(Duration::zero());
        tokio::time::sleep(wait.to_std().unwrap_or_default()).await;

        let code = run_once(args, config).await;
        info!(exit_code = code, "scheduled run finished");
    }
}

/// Parse arguments, resolve configuration, then run once or on a daily schedule
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(msg) = setup_logging(args.verbose, &args.log_format) {
        eprintln!("Error: {}", msg);
        return ExitCode::from(EXIT_CONFIG);
    }

    if let Err(msg) = load_environment(args.env_file.as_deref()) {
        eprintln!("Error: {}", msg);
        return ExitCode::from(EXIT_CONFIG);
    }

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let code = match args.daily_at.as_deref() {
        None => run_once(&args, &config).await,
        Some(raw) => match parse_daily_at(raw) {
            Ok(at) => run_daily(&args, &config, at).await,
            Err(msg) => {
                eprintln!("Error: {}", msg);
                EXIT_CONFIG
            }
        },
    };

    ExitCode::from(code)
}
