//! repomigrate command-line tool.
//!
//! Reads a mapping list of `sourceOrg/repo::targetOrg/repo` lines, creates
//! each target repository, mirrors the full history into it and prints one
//! line per mapping entry.
//!
//! Exit status: 0 when every task is done, 1 when any task failed or the run
//! was interrupted before every task ran, 2 when the run could not start
//! (configuration, credentials, mapping file, git).

mod signals;
mod style;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use repomigrate_core::config::MigrationConfig;
use repomigrate_core::git::{GitBinaryTransport, Workspace};
use repomigrate_core::github::GitHubClient;
use repomigrate_core::mapping::load_mapping_file;
use repomigrate_core::orchestrator::{Orchestrator, OrchestratorSettings};
use repomigrate_core::rate_limit::ApiRateLimiter;
use repomigrate_core::report::MigrationReport;

const EXIT_TASK_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

/// Filter used until the configuration has been read.
const DEFAULT_LOG_LEVEL: &str = "info";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Migrate GitHub repositories between organizations with full history.
#[derive(Parser, Debug)]
#[command(name = "repomigrate", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mapping list, one `sourceOrg/repo::targetOrg/repo` per line.
    #[arg(short, long)]
    mapping_file: Option<PathBuf>,

    /// Root directory for temporary mirror clones.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Number of repositories migrated in parallel.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Tracing filter, e.g. `debug` or `repomigrate_core=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let startup_level = cli.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    let (subscriber, log_handle) = log_subscriber(startup_level, std::io::stderr);
    subscriber.init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if cli.log_level.is_none() {
        if let Err(e) = log_handle.reload(env_filter(&config.log.level)) {
            eprintln!("{}", style::error(&format!("failed to apply log level: {}", e)));
        }
    }

    let report = match run(config).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = print_report(&report, cli.json) {
        eprintln!("{}", style::error(&format!("{:#}", e)));
        return ExitCode::from(EXIT_FATAL);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TASK_FAILED)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogHandle = reload::Handle<EnvFilter, Registry>;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Stderr subscriber whose filter can be swapped once the configured level
/// is known.
fn log_subscriber<W>(level: &str, writer: W) -> (impl Subscriber + Send + Sync, LogHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(env_filter(level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(writer));
    (subscriber, handle)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Load the config file (if any) and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<MigrationConfig> {
    let mut config = match (&cli.config, &cli.mapping_file) {
        (Some(path), _) => MigrationConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        (None, Some(mapping)) => MigrationConfig::with_mapping_file(mapping),
        (None, None) => anyhow::bail!("either --config or --mapping-file is required"),
    };

    if let Some(mapping) = &cli.mapping_file {
        config.migration.mapping_file = mapping.clone();
    }
    if let Some(work_dir) = &cli.work_dir {
        config.migration.work_dir = work_dir.clone();
    }
    if let Some(workers) = cli.workers {
        config.migration.workers = workers;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Pre-flight checks, then the batch itself.
///
/// Every error returned here is batch-level and fatal; task failures are
/// carried in the report.
async fn run(config: MigrationConfig) -> Result<MigrationReport> {
    let credentials = config
        .resolve_credentials()
        .context("failed to resolve credentials")?;

    let mapping = load_mapping_file(&config.migration.mapping_file)
        .context("failed to read mapping file")?;

    let transport = GitBinaryTransport::new(&credentials);
    let git_version = transport
        .check_available()
        .await
        .context("git is required to mirror repositories")?;
    info!(version = %git_version, "git available");

    let workspace = Workspace::new(&config.migration.work_dir);
    workspace
        .prepare()
        .context("failed to prepare work directory")?;

    let client = GitHubClient::new(&config.github.api_url, credentials.target_token.clone())
        .context("failed to create GitHub client")?;
    let limiter = Arc::new(ApiRateLimiter::new(
        config.github.requests_per_minute,
        config.github.burst,
    ));

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        Arc::new(transport),
        limiter,
        workspace,
        credentials,
        OrchestratorSettings::from_config(&config),
    )
    .with_shutdown(signals::setup_signal_handlers());

    let results = orchestrator.run(mapping.tasks).await;
    let report = MigrationReport::new(results, mapping.rejected);
    info!(run_id = %report.run_id, summary = %report.summary(), "run complete");
    Ok(report)
}

fn print_report(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(report).context("failed to serialize report")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", style::header("Migration report"));
    for entry in report.entries() {
        println!("  {}", style::report_line(&entry));
    }
    println!();
    println!("{}", report.summary());
    Ok(())
}
