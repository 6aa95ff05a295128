//! Controller events and keyboard commands

use crate::world::Cell;
use anyhow::bail;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Execution state reported by [`Event::StateChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    Executing,
    Paused,
    Quitting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Executing => "Executing",
            State::Paused => "Paused",
            State::Quitting => "Quitting",
        };
        f.write_str(s)
    }
}

/// Something the controller reports to its user
///
/// Every event carries the number of turns completed when it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    /// A cell changed value; also used to draw the seed and a resumed grid
    CellFlipped { completed_turns: u32, cell: Cell },

    /// All flips of a turn have been reported
    TurnComplete { completed_turns: u32 },

    /// Periodic live cell count from the broker
    AliveCellsCount { completed_turns: u32, cells_count: usize },

    /// An image was written to the pixel sink
    ImageOutputComplete { completed_turns: u32, filename: String },

    StateChange { completed_turns: u32, new_state: State },

    /// The run computed its last turn
    FinalTurnComplete { completed_turns: u32, alive: Vec<Cell> },
}

impl Event {
    pub fn completed_turns(&self) -> u32 {
        match self {
            Event::CellFlipped { completed_turns, .. }
            | Event::TurnComplete { completed_turns }
            | Event::AliveCellsCount { completed_turns, .. }
            | Event::ImageOutputComplete { completed_turns, .. }
            | Event::StateChange { completed_turns, .. }
            | Event::FinalTurnComplete { completed_turns, .. } => *completed_turns,
        }
    }

    /// Whether the event is worth printing on a console
    ///
    /// Per-cell and per-turn events are only useful to a renderer.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Event::CellFlipped { .. } | Event::TurnComplete { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CellFlipped { completed_turns, cell } => {
                write!(f, "Turn {:<8} cell {} flipped", completed_turns, cell)
            }
            Event::TurnComplete { completed_turns } => {
                write!(f, "Turn {:<8} complete", completed_turns)
            }
            Event::AliveCellsCount { completed_turns, cells_count } => {
                write!(f, "Turn {:<8} alive cells: {}", completed_turns, cells_count)
            }
            Event::ImageOutputComplete { completed_turns, filename } => {
                write!(f, "Turn {:<8} image written: {}", completed_turns, filename)
            }
            Event::StateChange { completed_turns, new_state } => {
                write!(f, "Turn {:<8} {}", completed_turns, new_state)
            }
            Event::FinalTurnComplete { completed_turns, alive } => {
                write!(f, "Turn {:<8} final turn complete, {} cells alive", completed_turns, alive.len())
            }
        }
    }
}

/// User command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `p`: toggle pause
    Pause,
    /// `s`: write the current grid
    Screenshot,
    /// `q`: detach, leaving the run resumable
    Quit,
    /// `k`: stop the broker and its workers
    Kill,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" => Ok(Command::Pause),
            "s" => Ok(Command::Screenshot),
            "q" => Ok(Command::Quit),
            "k" => Ok(Command::Kill),
            other => bail!("Unknown command '{}' (expected p, s, q or k)", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("p".parse::<Command>().unwrap(), Command::Pause);
        assert_eq!(" S\n".parse::<Command>().unwrap(), Command::Screenshot);
        assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("k".parse::<Command>().unwrap(), Command::Kill);
        assert!("x".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn test_event_json() {
        let event = Event::AliveCellsCount { completed_turns: 12, cells_count: 40 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "AliveCellsCount");
        assert_eq!(json["completed_turns"], 12);
        assert_eq!(json["cells_count"], 40);

        let event = Event::StateChange { completed_turns: 3, new_state: State::Paused };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["new_state"], "Paused");
    }

    #[test]
    fn test_reportable_events() {
        assert!(!Event::TurnComplete { completed_turns: 1 }.is_reportable());
        assert!(Event::StateChange { completed_turns: 1, new_state: State::Quitting }.is_reportable());
    }
}
