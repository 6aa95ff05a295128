//! Error taxonomy shared by broker, workers and controller
//!
//! Every error that crosses the wire is a [`GolError`]. Each variant carries
//! the last turn that was fully merged into the canonical grid, so a caller
//! can always report a consistent turn number even when a call fails. The
//! enum is serializable so a worker's failure reaches the controller intact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for operations that report a [`GolError`]
pub type GolResult<T> = std::result::Result<T, GolError>;

/// Errors reported by RPC operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GolError {
    /// Dial or accept failure for a peer. Fatal for that peer until a later
    /// reconnect succeeds; never fatal for the broker itself.
    #[error("connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },

    /// One band of a turn failed; the turn was aborted and nothing merged
    #[error("turn {turn} aborted: band {band_index} [{y1}, {y2}] failed: {reason}")]
    PartialFailure {
        turn: u32,
        band_index: usize,
        y1: usize,
        y2: usize,
        reason: String,
    },

    /// Malformed request rejected before any dispatch
    #[error("protocol error at turn {turn}: {reason}")]
    Protocol { turn: u32, reason: String },

    /// Command not permitted in the current run state
    #[error("state conflict at turn {turn}: {reason}")]
    StateConflict { turn: u32, reason: String },

    /// Worker rejected the band bounds
    #[error("invalid band [{y1}, {y2}] for height {height}")]
    InvalidBand { y1: usize, y2: usize, height: usize },
}

impl GolError {
    pub fn protocol(turn: u32, reason: impl Into<String>) -> Self {
        Self::Protocol { turn, reason: reason.into() }
    }

    pub fn conflict(turn: u32, reason: impl Into<String>) -> Self {
        Self::StateConflict { turn, reason: reason.into() }
    }

    pub fn connection(addr: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Stamp `turn` as the last consistent turn
    ///
    /// Grid helpers raise errors without knowing the run's turn; callers
    /// that do know it attach it here. Variants that carry no turn are
    /// returned unchanged.
    pub fn at_turn(self, turn: u32) -> Self {
        match self {
            Self::PartialFailure { band_index, y1, y2, reason, .. } => Self::PartialFailure {
                turn,
                band_index,
                y1,
                y2,
                reason,
            },
            Self::Protocol { reason, .. } => Self::Protocol { turn, reason },
            Self::StateConflict { reason, .. } => Self::StateConflict { turn, reason },
            other => other,
        }
    }

    /// Last consistent turn known when the error was raised
    pub fn turn(&self) -> u32 {
        match self {
            Self::PartialFailure { turn, .. }
            | Self::Protocol { turn, .. }
            | Self::StateConflict { turn, .. } => *turn,
            Self::Connection { .. } | Self::InvalidBand { .. } => 0,
        }
    }
}
