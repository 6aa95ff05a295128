//! GolPulse CLI entry point

use anyhow::{Context, Result};
use golpulse::config::cli::{Cli, ExecutionMode};
use golpulse::config::{cli_convert, validator, Config};
use golpulse::controller::{self, Command, Event, Outcome, SessionConfig};
use golpulse::io::PgmImages;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;
    init_logging(cli.debug);

    let config = golpulse::config::toml::load(&cli)?;
    validator::validate_config(&config, cli.mode)
        .context("Configuration validation failed")?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(async {
        match cli.mode {
            ExecutionMode::Worker => run_worker(&config).await,
            ExecutionMode::Broker => run_broker(&config).await,
            ExecutionMode::Controller => run_controller(&config).await,
        }
    });

    // The stdin reader may still be parked on a blocking read
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Install the tracing subscriber; `RUST_LOG` wins over `--debug`
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_worker(config: &Config) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.worker.listen_port);
    golpulse::worker::run(&addr).await
}

async fn run_broker(config: &Config) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.broker.listen_port);
    golpulse::broker::run(&addr, &config.broker.workers, config.broker.result_mode).await
}

async fn run_controller(config: &Config) -> Result<()> {
    println!("GolPulse v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", config);
    println!("Commands: p = pause/resume, s = screenshot, q = quit, k = kill");
    println!();

    let session = SessionConfig {
        broker_addr: config.controller.broker.clone(),
        params: config.params(),
        poll_interval: cli_convert::parse_interval(&config.controller.poll_interval)?,
    };
    let images = PgmImages::new(&config.controller.image_dir, &config.controller.output_dir);

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_commands(command_tx));
    let printer = tokio::spawn(print_events(event_rx, config.controller.json_events));

    let outcome = controller::run(&session, images.clone(), images, command_rx, event_tx).await;
    // All senders are gone once the session returns, so the printer drains and ends
    if let Err(e) = printer.await {
        warn!("event printer failed: {}", e);
    }

    let outcome = outcome.map_err(|e| {
        error!("{:#}", e);
        e
    })?;

    println!();
    match outcome {
        Outcome::Finished { turn } => println!("Run complete after {} turns", turn),
        Outcome::Quit { turn } => println!("Detached at turn {}; start the controller again to resume", turn),
        Outcome::Killed { turn } => println!("Broker stopped at turn {}", turn),
    }
    Ok(())
}

/// Forward keypresses from stdin, one command per line
async fn read_commands(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match line.parse::<Command>() {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{}", e),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("failed to read stdin: {}", e);
                break;
            }
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<Event>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("failed to encode event: {}", e),
            }
        } else if event.is_reportable() {
            println!("{}", event);
        }
    }
}
