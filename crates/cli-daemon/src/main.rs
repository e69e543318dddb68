//! CLI entry point for vidprep
//!
//! `vidprep serve` runs the daemon with its status API; `vidprep process`
//! runs a single file through the same pipeline and prints the result.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vidprep_daemon::config::ConfigError;
use vidprep_daemon::{Config, Daemon, DaemonError, JobStatus};

/// vidprep - poster frames and preview clips for uploaded videos
#[derive(Parser, Debug)]
#[command(name = "vidprep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon and the status API
    Serve(CommonArgs),
    /// Process one video and print its final status as JSON
    Process {
        /// Job id (letters, digits, '_' and '-')
        job_id: String,
        /// Path to the source video
        source: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the configuration file; defaults plus environment overrides when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip startup checks (temp dir, ffprobe, ffmpeg, libx264)
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(env_filter)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            Config::load(path)
        }
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn build_daemon(args: &CommonArgs) -> Result<Daemon, DaemonError> {
    let config = load_config(args.config.as_deref())?;
    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::with_config(config).await
    }
}

async fn serve(args: CommonArgs) -> ExitCode {
    let daemon = match build_daemon(&args).await {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    info!(
        bind = %daemon.config.server.bind,
        pool_size = daemon.plan.pool_size,
        media_root = %daemon.config.storage.media_root.display(),
        "vidprep starting"
    );

    if let Err(e) = daemon.run_with_server().await {
        error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn process(job_id: String, source: PathBuf, args: CommonArgs) -> ExitCode {
    let daemon = match build_daemon(&args).await {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    let mut updates = daemon.tracker.subscribe();
    let worker = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run().await })
    };

    let source = std::fs::canonicalize(&source)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(&source)))
        .unwrap_or(source);
    if let Err(e) = daemon.submit(&job_id, source, None).await {
        error!(job_id = %job_id, error = %e, "Submission rejected");
        worker.abort();
        return ExitCode::FAILURE;
    }

    loop {
        match updates.recv().await {
            Ok(snap) if snap.id == job_id => {
                info!(progress = snap.progress, status = %snap.status, "{}", snap.message);
                if snap.is_terminal() {
                    break;
                }
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    worker.abort();

    let snapshot = match daemon.status(&job_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "Job record missing");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Failed to serialize job record");
            return ExitCode::FAILURE;
        }
    }

    if snapshot.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Process {
            job_id,
            source,
            common,
        } => process(job_id, source, common).await,
    }
}
