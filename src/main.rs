//! Threat model:
//! - Plaintext only exists in the local files the user names and in bounded,
//!   zeroized transfer buffers.
//! - Every token resource acquired by a command is released before exit,
//!   on the failure paths too.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sefile::cli::Cli;
use sefile::config::Config;
use sefile::error::Error;
use sefile::soft::SoftToken;
use sefile::{cleanup, commands};

fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// RUST_LOG wins, then --verbose, then the configured level.
fn init_logging(verbose: bool, level: &str) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logging(cli.verbose, "warn");
            return cleanup::finish(Err(err));
        }
    };
    init_logging(cli.verbose, &config.log.level);
    tracing::debug!(search_paths = ?config.device.search_paths, "configuration loaded");

    let token = SoftToken::new(config.device.search_paths.clone());
    cleanup::finish(commands::run(&token, cli.command, &config))
}
