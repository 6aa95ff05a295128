//! Configuration validation

use super::cli::ExecutionMode;
use super::cli_convert::parse_interval;
use super::*;
use crate::world::partition;
use anyhow::{bail, Context, Result};

/// Validate the sections `mode` uses
pub fn validate_config(config: &Config, mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::Controller => {
            validate_params(&config.params)?;
            validate_controller(&config.controller)?;
        }
        ExecutionMode::Broker => validate_broker(&config.broker)?,
        ExecutionMode::Worker => {}
    }
    Ok(())
}

/// Validate run parameters
pub fn validate_params(params: &ParamsConfig) -> Result<()> {
    if params.image_width == 0 || params.image_height == 0 {
        bail!(
            "image dimensions must be positive, got {}x{}",
            params.image_width,
            params.image_height
        );
    }

    if params.threads == 0 {
        bail!("threads must be at least 1");
    }

    if params.threads > params.image_height {
        bail!(
            "threads ({}) cannot exceed image height ({})",
            params.threads,
            params.image_height
        );
    }

    partition(params.image_height, params.threads)?;
    Ok(())
}

/// Validate broker settings
pub fn validate_broker(broker: &BrokerConfig) -> Result<()> {
    if broker.workers.is_empty() {
        bail!("broker needs at least one worker address (--workers or --workers-file)");
    }

    for (i, addr) in broker.workers.iter().enumerate() {
        let valid = addr
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            bail!("worker {}: invalid address '{}' (expected host:port)", i, addr);
        }
    }

    Ok(())
}

/// Validate controller settings
pub fn validate_controller(controller: &ControllerConfig) -> Result<()> {
    if controller.broker.trim().is_empty() {
        bail!("broker address must not be empty");
    }

    let interval = parse_interval(&controller.poll_interval)
        .context("Invalid poll interval")?;
    if interval.is_zero() {
        bail!("poll interval must be greater than zero");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_params() {
        let mut params = ParamsConfig::default();
        assert!(validate_params(&params).is_ok());

        params.threads = 0;
        assert!(validate_params(&params).is_err());

        params.threads = 513;
        assert!(validate_params(&params).is_err());

        params.threads = 512;
        assert!(validate_params(&params).is_ok());

        params.image_width = 0;
        assert!(validate_params(&params).is_err());
    }

    #[test]
    fn test_validate_broker_workers() {
        let mut broker = BrokerConfig::default();
        assert!(validate_broker(&broker).is_err());

        broker.workers = vec!["10.0.0.1:8031".to_string(), "node-b:9000".to_string()];
        assert!(validate_broker(&broker).is_ok());

        broker.workers.push("node-c".to_string());
        assert!(validate_broker(&broker).is_err());

        broker.workers = vec![":8031".to_string()];
        assert!(validate_broker(&broker).is_err());
    }

    #[test]
    fn test_validate_poll_interval() {
        let mut controller = ControllerConfig::default();
        assert!(validate_controller(&controller).is_ok());

        controller.poll_interval = "0s".to_string();
        assert!(validate_controller(&controller).is_err());

        controller.poll_interval = "often".to_string();
        assert!(validate_controller(&controller).is_err());
    }

    #[test]
    fn test_worker_mode_needs_nothing() {
        let config = Config::default();
        assert!(validate_config(&config, ExecutionMode::Worker).is_ok());
        // Default config has no workers
        assert!(validate_config(&config, ExecutionMode::Broker).is_err());
        assert!(validate_config(&config, ExecutionMode::Controller).is_ok());
    }
}
