//! bisync: two-way sync between a local folder and one or more remote containers.
//!
//! Each run lists both sides, compares them with the state recorded after the
//! last successful run, and applies the resulting uploads, downloads,
//! deletions and merges.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bisync::app::{App, log_events};
use bisync::config::Config;

#[derive(Parser, Debug)]
#[command(name = "bisync")]
#[command(about = "Two-way folder sync driven by content-hash baselines")]
struct Args {
    /// Path to the JSON config file (defaults to $BISYNC_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every endpoint, or only one
    Sync {
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Show what a sync would do, as JSON
    Plan {
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Show when each endpoint last synced
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,bisync=debug"
    } else {
        "info,bisync=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    info!(
        "Local root {} with {} endpoint(s)",
        config.local_root.display(),
        config.endpoints.len()
    );

    match args.command {
        Command::Sync { endpoint } => {
            let app = App::new(config, false);
            let _log = log_events(app.events());

            let results = app.sync(endpoint.as_deref()).await?;
            let mut failed = 0;
            for (name, result) in &results {
                match result {
                    Ok(report) => println!("{}: {}", name, report.summary),
                    Err(e) => {
                        failed += 1;
                        error!("[{}] {}", name, e);
                        println!("{}: FAILED ({})", name, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} endpoint(s) failed", failed, results.len());
            }
        }
        Command::Plan { endpoint } => {
            let app = App::new(config, true);
            let mut reports = Vec::new();
            for (name, result) in app.sync(endpoint.as_deref()).await? {
                let report = result.with_context(|| format!("Failed to plan {}", name))?;
                reports.push(report);
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Status => {
            let app = App::new(config, true);
            let statuses = app.status().await.context("Failed to read baselines")?;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
    }

    Ok(())
}
