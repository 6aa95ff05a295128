//! Broker run state
//!
//! The canonical grid, the turn counter and the control flags live together
//! in [`RunState`]. The broker keeps exactly one `RunState` behind one mutex
//! and only touches it through the methods below, each of which is a single
//! critical section. That is what lets read-only queries observe a grid at a
//! completed turn boundary: a merge never releases the lock half-way.

use crate::error::{GolError, GolResult};
use crate::rpc::protocol::Response;
use crate::worker::BandResult;
use crate::world::{Band, Cell, Grid, Params};

/// Lifecycle phase derived from the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run, or the last run computed all of its turns
    Idle,
    Running,
    Paused,
    /// Controller detached; state kept for a resume
    Quit,
    /// Terminal
    Killed,
}

#[derive(Debug)]
struct Session {
    params: Params,
    grid: Grid,
}

/// Snapshot one turn is computed from
#[derive(Debug)]
pub struct PreparedTurn {
    pub params: Params,
    pub grid: Grid,
    pub turn: u32,
    epoch: u64,
}

/// Canonical world plus control flags
#[derive(Debug, Default)]
pub struct RunState {
    session: Option<Session>,
    current_turn: u32,
    paused: bool,
    quit: bool,
    killed: bool,
    /// Bumped by every initialize, quit and kill; a turn prepared under an
    /// older epoch is never merged
    epoch: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        if self.killed {
            return Phase::Killed;
        }
        if self.quit {
            return Phase::Quit;
        }
        match &self.session {
            None => Phase::Idle,
            Some(s) if self.current_turn >= s.params.turns => Phase::Idle,
            Some(_) if self.paused => Phase::Paused,
            Some(_) => Phase::Running,
        }
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    pub fn params(&self) -> Option<Params> {
        self.session.as_ref().map(|s| s.params)
    }

    fn session(&self) -> GolResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| GolError::conflict(self.current_turn, "no world has been loaded"))
    }

    fn response(&self, with_grid: bool) -> GolResult<Response> {
        let session = self.session()?;
        Ok(Response {
            grid: with_grid.then(|| session.grid.clone()),
            changed_cells: Vec::new(),
            current_turn: self.current_turn,
            alive_count: session.grid.alive_count(),
            paused: self.paused,
        })
    }

    /// Seed a fresh run, or resume one left behind by a quit
    ///
    /// A fresh run needs a seed grid and returns none. A resume ignores `grid`
    /// and returns the preserved canonical grid so the caller can reconcile
    /// its mirror.
    pub fn initialize(&mut self, params: Params, grid: Option<Grid>) -> GolResult<Response> {
        match self.phase() {
            Phase::Killed => Err(GolError::conflict(self.current_turn, "broker has been killed")),
            Phase::Running | Phase::Paused => Err(GolError::conflict(
                self.current_turn,
                "a run is already in progress",
            )),
            Phase::Quit => {
                let session = self.session()?;
                if session.params != params {
                    return Err(GolError::conflict(
                        self.current_turn,
                        format!(
                            "cannot resume {:?} with different parameters {:?}",
                            session.params, params
                        ),
                    ));
                }
                self.quit = false;
                self.paused = false;
                self.epoch += 1;
                self.response(true)
            }
            Phase::Idle => {
                let grid = grid.ok_or_else(|| {
                    GolError::protocol(self.current_turn, "Initialize requires a seed grid")
                })?;
                params
                    .check_grid(&grid)
                    .map_err(|e| e.at_turn(self.current_turn))?;
                self.session = Some(Session { params, grid });
                self.current_turn = 0;
                self.paused = false;
                self.quit = false;
                self.epoch += 1;
                self.response(false)
            }
        }
    }

    /// Whether the turn loop must wait at its pause checkpoint
    ///
    /// Fails once the run has been quit or killed, so a waiting turn gives up
    /// instead of waiting forever.
    pub fn must_wait(&self) -> GolResult<bool> {
        match self.phase() {
            Phase::Killed => Err(GolError::conflict(self.current_turn, "broker has been killed")),
            Phase::Quit => Err(GolError::conflict(self.current_turn, "controller has quit")),
            _ => Ok(self.paused),
        }
    }

    /// Parameters and grid the next turn computes from
    pub fn prepare_turn(&self) -> GolResult<PreparedTurn> {
        self.must_wait()?;
        let session = self.session()?;
        if self.current_turn >= session.params.turns {
            return Err(GolError::conflict(
                self.current_turn,
                format!("all {} turns have been computed", session.params.turns),
            ));
        }
        Ok(PreparedTurn {
            params: session.params,
            grid: session.grid.clone(),
            turn: self.current_turn,
            epoch: self.epoch,
        })
    }

    /// Merge every band of one turn and advance the counter
    ///
    /// Results must already be checked against their bands. A turn that
    /// overlapped a quit, kill or new initialize is discarded so the grid
    /// stays at the last turn the controller was told about.
    pub fn merge(
        &mut self,
        prepared: &PreparedTurn,
        results: Vec<(Band, BandResult)>,
    ) -> GolResult<Vec<Cell>> {
        if self.quit || self.killed || prepared.epoch != self.epoch {
            return Err(GolError::conflict(
                self.current_turn,
                "run was stopped while the turn was computing; turn discarded",
            ));
        }

        let turn = self.current_turn;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| GolError::conflict(turn, "no world has been loaded"))?;

        // Bands are applied to a copy so a bad band leaves the grid at `turn`
        let mut next = session.grid.clone();
        let mut changed = Vec::new();
        for (band, result) in results {
            match result {
                BandResult::Rows(rows) => next
                    .write_rows(band.y1, &rows)
                    .map_err(|e| e.at_turn(turn))?,
                BandResult::Flipped(cells) => {
                    next.apply_flips(&cells).map_err(|e| e.at_turn(turn))?;
                    changed.extend(cells);
                }
            }
        }

        session.grid = next;
        self.current_turn += 1;
        Ok(changed)
    }

    /// Response describing the turn that was just merged
    pub fn turn_response(&self, changed: Vec<Cell>, with_grid: bool) -> GolResult<Response> {
        let mut response = self.response(with_grid)?;
        response.changed_cells = changed;
        Ok(response)
    }

    pub fn is_finished(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| self.current_turn >= s.params.turns)
            .unwrap_or(false)
    }

    pub fn count_alive(&self) -> GolResult<Response> {
        self.response(false)
    }

    pub fn snapshot(&self) -> GolResult<Response> {
        self.response(true)
    }

    pub fn toggle_pause(&mut self) -> GolResult<Response> {
        match self.phase() {
            Phase::Killed => Err(GolError::conflict(self.current_turn, "broker has been killed")),
            Phase::Quit => Err(GolError::conflict(
                self.current_turn,
                "controller has quit; initialize to resume",
            )),
            _ => {
                self.session()?;
                self.paused = !self.paused;
                self.response(false)
            }
        }
    }

    pub fn client_quit(&mut self) -> GolResult<Response> {
        if self.killed {
            return Err(GolError::conflict(self.current_turn, "broker has been killed"));
        }
        self.session()?;
        self.quit = true;
        self.paused = true;
        self.epoch += 1;
        self.response(true)
    }

    /// Mark the broker killed
    ///
    /// Returns the final grid when one was loaded.
    pub fn kill(&mut self) -> GolResult<Response> {
        if self.killed {
            return Err(GolError::conflict(self.current_turn, "broker has already been killed"));
        }
        self.killed = true;
        self.paused = false;
        self.epoch += 1;
        Ok(self.response(true).unwrap_or(Response {
            current_turn: self.current_turn,
            ..Response::default()
        }))
    }
}
