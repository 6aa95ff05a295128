//! CLI to Config conversion utilities

use crate::config::cli;
use crate::rpc::protocol::ResultMode;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Parse an interval string (e.g., "2s", "500ms", "1m") to a duration
///
/// A bare number is taken as seconds.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, millis) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("sec") || s.ends_with('s') {
        (s.trim_end_matches("sec").trim_end_matches('s'), 1000)
    } else if s.ends_with("min") || s.ends_with('m') {
        (s.trim_end_matches("min").trim_end_matches('m'), 60_000)
    } else {
        (s.as_str(), 1000)
    };

    let num: u64 = num_str.trim().parse()
        .with_context(|| format!("Invalid interval format: {}", s))?;

    Ok(Duration::from_millis(num * millis))
}

/// Add `default_port` to an address that does not name one
fn with_port(addr: &str, default_port: u16) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, default_port)
    }
}

/// Parse a comma-separated address list (e.g., "10.0.1.10:8031,10.0.1.11")
pub fn parse_address_list(list: &str, default_port: u16) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(|addr| with_port(addr, default_port))
        .collect()
}

/// Read worker addresses from a file, one per line
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_address_file(path: &Path, default_port: u16) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workers file: {}", path.display()))?;

    Ok(content.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|addr| with_port(addr, default_port))
        .collect())
}

/// Convert CLI ResultModeArg to the wire ResultMode
pub fn convert_result_mode(arg: cli::ResultModeArg) -> ResultMode {
    match arg {
        cli::ResultModeArg::FullBand => ResultMode::FullBand,
        cli::ResultModeArg::Delta => ResultMode::Delta,
    }
}
