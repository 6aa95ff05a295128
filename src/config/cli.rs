//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Controller (default) - read the seed image and drive a run
    Controller,
    /// Broker - own the canonical grid and fan turns out to workers
    Broker,
    /// Worker - evolve bands on request
    Worker,
}

/// Shape of band results requested from workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResultModeArg {
    /// Full next-generation rows of each band
    FullBand,
    /// Only the cells that changed
    Delta,
}

/// GolPulse - distributed Game of Life
#[derive(Parser, Debug)]
#[command(name = "golpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: controller, broker, or worker
    #[arg(long, value_enum, default_value = "controller")]
    pub mode: ExecutionMode,

    /// TOML configuration file (command-line options take precedence)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (broker and worker modes)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Comma-separated worker addresses for broker mode (e.g., "10.0.1.10:8031,10.0.1.11")
    #[arg(long)]
    pub workers: Option<String>,

    /// File containing worker addresses (one per line, for broker mode)
    #[arg(long)]
    pub workers_file: Option<PathBuf>,

    /// Port assumed for worker addresses that do not name one
    #[arg(long, default_value = "8031")]
    pub worker_port: u16,

    /// Broker address (controller mode)
    #[arg(long, env = "GOLPULSE_BROKER")]
    pub broker: Option<String>,

    // === Run Parameters ===
    /// Grid width in cells
    #[arg(short = 'w', long)]
    pub width: Option<usize>,

    /// Grid height in cells
    #[arg(long)]
    pub height: Option<usize>,

    /// Number of generations to compute
    #[arg(long)]
    pub turns: Option<u32>,

    /// Number of bands each generation is split into
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Band result shape (broker mode)
    #[arg(long, value_enum)]
    pub result_mode: Option<ResultModeArg>,

    // === Controller Options ===
    /// Interval between alive-cell reports (e.g., 2s, 500ms)
    #[arg(long)]
    pub poll_interval: Option<String>,

    /// Directory holding input images
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Directory receiving output images
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print every event as a JSON line
    #[arg(long)]
    pub json_events: bool,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Reject option combinations before any configuration is loaded
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.is_some() && self.workers_file.is_some() {
            anyhow::bail!("specify only one of --workers and --workers-file");
        }

        if self.mode != ExecutionMode::Broker
            && (self.workers.is_some() || self.workers_file.is_some() || self.result_mode.is_some())
        {
            anyhow::bail!("--workers, --workers-file and --result-mode only apply to broker mode");
        }

        if let Some(threads) = self.threads {
            if threads == 0 {
                anyhow::bail!("threads must be at least 1");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_args() {
        let cli = Cli::try_parse_from([
            "golpulse",
            "--mode",
            "broker",
            "--listen-port",
            "9000",
            "--workers",
            "10.0.0.1:8031,10.0.0.2",
            "--result-mode",
            "full-band",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Broker);
        assert_eq!(cli.listen_port, Some(9000));
        assert_eq!(cli.result_mode, Some(ResultModeArg::FullBand));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_controller_args() {
        let cli = Cli::try_parse_from([
            "golpulse", "-w", "64", "--height", "32", "--turns", "100", "-t", "4",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Controller);
        assert_eq!((cli.width, cli.height), (Some(64), Some(32)));
        assert_eq!(cli.turns, Some(100));
        assert_eq!(cli.threads, Some(4));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_misplaced_options() {
        let cli = Cli::try_parse_from(["golpulse", "--mode", "worker", "--workers", "a:1"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["golpulse", "-t", "0"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from([
            "golpulse",
            "--mode",
            "broker",
            "--workers",
            "a:1",
            "--workers-file",
            "workers.txt",
        ])
        .unwrap();
        assert!(cli.validate().is_err());
    }
}
