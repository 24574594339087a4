mod commands;
mod config;
mod roster;

use anyhow::Result;
use clap::Parser;
use commands::{handle_command, Command, CommandContext};
use config::{config_path, TrackerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stagegate")]
#[command(about = "Stage-dependency tracker for the video processing pipeline", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "STAGEGATE_CONFIG")]
    config: Option<PathBuf>,
    /// Tracker database, overrides `store_path` from the config
    #[arg(long, global = true, env = "STAGEGATE_DB")]
    db: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if !init_logging(cli.debug) {
        eprintln!("stagegate: a tracing subscriber was already installed");
    }

    let path = config_path(cli.config.as_deref());
    let config = TrackerConfig::load(&path)?;
    let store_path = config.store_path(cli.db.as_deref());
    debug!(
        event = "config_loaded",
        config = %path.display(),
        store = %store_path.display()
    );

    let ctx = CommandContext { config, store_path };
    handle_command(cli.command, &ctx)
}

/// `RUST_LOG` wins inside `init_logging`; below it `--debug` beats
/// `STAGEGATE_LOG_LEVEL`.
fn log_level(debug: bool, configured: Option<String>) -> String {
    if debug {
        "debug".to_string()
    } else if let Some(level) = configured {
        level
    } else {
        "warn".to_string()
    }
}

fn init_logging(debug: bool) -> bool {
    let level = log_level(debug, std::env::var("STAGEGATE_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
