//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! A TOML file (`--config`) provides the base values; any option given on
//! the command line overrides it.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::rpc::protocol::ResultMode;
use crate::world::Params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub params: ParamsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

impl Config {
    pub fn params(&self) -> Params {
        Params {
            turns: self.params.turns,
            threads: self.params.threads,
            image_width: self.params.image_width,
            image_height: self.params.image_height,
        }
    }
}

/// Run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Generations to compute
    #[serde(default = "default_turns")]
    pub turns: u32,
    /// Bands per generation
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_image_size")]
    pub image_width: usize,
    #[serde(default = "default_image_size")]
    pub image_height: usize,
}

fn default_turns() -> u32 {
    10_000_000
}

fn default_threads() -> usize {
    8
}

fn default_image_size() -> usize {
    512
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            turns: default_turns(),
            threads: default_threads(),
            image_width: default_image_size(),
            image_height: default_image_size(),
        }
    }
}

/// Broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_port")]
    pub listen_port: u16,
    /// Worker addresses (`host:port`), band `i` goes to worker `i mod N`
    #[serde(default)]
    pub workers: Vec<String>,
    /// Shape of band results requested from workers
    #[serde(default)]
    pub result_mode: ResultMode,
}

fn default_broker_port() -> u16 {
    8030
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_broker_port(),
            workers: Vec::new(),
            result_mode: ResultMode::default(),
        }
    }
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_port")]
    pub listen_port: u16,
}

fn default_worker_port() -> u16 {
    8031
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_worker_port(),
        }
    }
}

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Broker address (`host:port`)
    #[serde(default = "default_broker_addr")]
    pub broker: String,
    /// Interval between alive-cell counts (e.g. "2s", "500ms")
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Directory holding `{W}x{H}.pgm` inputs
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Directory receiving `{W}x{H}x{turn}.pgm` outputs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Print events as JSON lines
    #[serde(default)]
    pub json_events: bool,
}

fn default_broker_addr() -> String {
    format!("127.0.0.1:{}", default_broker_port())
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            broker: default_broker_addr(),
            poll_interval: default_poll_interval(),
            image_dir: default_image_dir(),
            output_dir: default_output_dir(),
            json_events: false,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Grid:      {}x{}, {} turns, {} bands",
            self.params.image_width, self.params.image_height, self.params.turns, self.params.threads
        )?;
        writeln!(f, "Broker:    {}", self.controller.broker)?;
        writeln!(f, "Images:    {} -> {}", self.controller.image_dir.display(), self.controller.output_dir.display())?;
        write!(f, "Poll:      every {}", self.controller.poll_interval)
    }
}
