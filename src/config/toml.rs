//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::{convert_result_mode, parse_address_list, read_address_file};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the file named by `--config` (or defaults) and apply CLI overrides
pub fn load(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Run parameters
    if let Some(width) = cli.width {
        config.params.image_width = width;
    }
    if let Some(height) = cli.height {
        config.params.image_height = height;
    }
    if let Some(turns) = cli.turns {
        config.params.turns = turns;
    }
    if let Some(threads) = cli.threads {
        config.params.threads = threads;
    }

    // Listen port applies to whichever server this process runs
    if let Some(port) = cli.listen_port {
        config.broker.listen_port = port;
        config.worker.listen_port = port;
    }

    // Worker addresses
    if let Some(ref list) = cli.workers {
        config.broker.workers = parse_address_list(list, cli.worker_port);
    } else if let Some(ref path) = cli.workers_file {
        config.broker.workers = read_address_file(path, cli.worker_port)?;
    }
    if let Some(mode) = cli.result_mode {
        config.broker.result_mode = convert_result_mode(mode);
    }

    // Controller
    if let Some(ref broker) = cli.broker {
        config.controller.broker = broker.clone();
    }
    if let Some(ref interval) = cli.poll_interval {
        config.controller.poll_interval = interval.clone();
    }
    if let Some(ref dir) = cli.image_dir {
        config.controller.image_dir = dir.clone();
    }
    if let Some(ref dir) = cli.output_dir {
        config.controller.output_dir = dir.clone();
    }
    if cli.json_events {
        config.controller.json_events = true;
    }

    Ok(config)
}
