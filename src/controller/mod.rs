//! Local controller (distributor)
//!
//! The controller seeds the broker with the input image and then drives the
//! run one `AdvanceTurn` at a time. It keeps a mirror of the grid that is
//! only ever updated from broker replies, and reports everything it learns
//! as [`Event`]s.
//!
//! Three broker connections are used so that none waits on another:
//! - the turn driver, which may sit in a long `AdvanceTurn` or at the pause
//!   checkpoint
//! - the poller, which asks for the alive count on a fixed interval
//! - the control connection, used for seeding and for user commands

pub mod events;
pub mod poller;

pub use events::{Command, Event, State};

use crate::error::{GolError, GolResult};
use crate::io::{PixelSink, PixelSource};
use crate::rpc::client::RpcClient;
use crate::rpc::protocol::{Operation, Request, Response};
use crate::world::{Grid, Params};
use crate::Result;
use anyhow::{anyhow, Context};
use poller::Poller;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default interval between alive-cell counts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Settings for one controller session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker address (`host:port`)
    pub broker_addr: String,

    pub params: Params,

    /// Interval between alive-cell counts
    pub poll_interval: Duration,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every turn was computed
    Finished { turn: u32 },
    /// The user detached; the broker keeps the run for a resume
    Quit { turn: u32 },
    /// The broker and its workers were stopped
    Killed { turn: u32 },
}

impl Outcome {
    pub fn turn(&self) -> u32 {
        match self {
            Outcome::Finished { turn } | Outcome::Quit { turn } | Outcome::Killed { turn } => *turn,
        }
    }
}

/// Run one controller session against the broker
///
/// Reads the seed from `source`, writes snapshots to `sink`, takes commands
/// from `commands` and reports to `events`. Returns when the run finishes or
/// a quit or kill command has been carried out.
pub async fn run<I, O>(
    config: &SessionConfig,
    mut source: I,
    sink: O,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<Event>,
) -> Result<Outcome>
where
    I: PixelSource,
    O: PixelSink,
{
    let seed = source
        .read_grid(&config.params)
        .context("Failed to read the input image")?;
    let control = connect(&config.broker_addr).await?;

    let distributor = Distributor {
        params: config.params,
        control,
        sink,
        events,
        mirror: seed,
        turn: 0,
    };
    distributor.run(config, commands).await
}

async fn connect(addr: &str) -> Result<RpcClient> {
    RpcClient::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to broker {}", addr))
}

struct Distributor<O: PixelSink> {
    params: Params,
    control: RpcClient,
    sink: O,
    events: mpsc::UnboundedSender<Event>,
    mirror: Grid,
    /// Completed turns the mirror reflects
    turn: u32,
}

impl<O: PixelSink> Distributor<O> {
    async fn run(mut self, config: &SessionConfig, mut commands: mpsc::Receiver<Command>) -> Result<Outcome> {
        let turn = self.seed().await?;
        if turn >= self.params.turns {
            return self.finish(turn);
        }

        let mut poller = Some(Poller::spawn(
            connect(&config.broker_addr).await?,
            self.params,
            config.poll_interval,
            self.events.clone(),
        ));
        let mut driver = TurnDriver::spawn(connect(&config.broker_addr).await?, self.params);

        let mut commands_open = true;
        loop {
            tokio::select! {
                result = driver.turns.recv() => {
                    let response = match result {
                        Some(Ok(response)) => response,
                        Some(Err(e)) => {
                            if let Some(p) = poller.take() {
                                p.stop().await;
                            }
                            driver.stop().await;
                            return Err(self.abandon(e).await);
                        }
                        None => return Err(anyhow!("Turn driver stopped unexpectedly")),
                    };

                    let turn = response.current_turn;
                    self.apply_turn(response)?;
                    if turn >= self.params.turns {
                        if let Some(p) = poller.take() {
                            p.stop().await;
                        }
                        return self.finish(turn);
                    }
                }
                command = commands.recv(), if commands_open => {
                    let Some(command) = command else {
                        debug!("command stream closed");
                        commands_open = false;
                        continue;
                    };

                    debug!(?command, "command received");
                    match command {
                        Command::Pause => {
                            if let Err(e) = self.toggle_pause().await {
                                warn!("pause failed: {:#}", e);
                            }
                        }
                        Command::Screenshot => {
                            if let Err(e) = self.screenshot().await {
                                warn!("screenshot failed: {:#}", e);
                            }
                        }
                        Command::Quit | Command::Kill => {
                            if let Some(p) = poller.take() {
                                p.stop().await;
                            }
                            self.stop_driver(&mut driver).await;
                            return if command == Command::Quit {
                                self.quit().await
                            } else {
                                self.kill().await
                            };
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    /// Initialize the broker and report the starting grid
    ///
    /// A fresh run reports every live cell of the seed. A resumed run
    /// reports the cells where the broker's grid differs from the seed and
    /// adopts the broker's grid.
    async fn seed(&mut self) -> Result<u32> {
        let request = Request::new(self.params).with_grid(self.mirror.clone());
        let response = self
            .control
            .call(Operation::Initialize, request)
            .await
            .context("Broker rejected the run")?;
        let turn = response.current_turn;
        self.turn = turn;

        match response.grid {
            None => {
                info!(turns = self.params.turns, threads = self.params.threads, "run started");
                for cell in self.mirror.alive_cells() {
                    self.emit(Event::CellFlipped { completed_turns: 0, cell });
                }
            }
            Some(grid) => {
                info!(turn, "resuming run");
                self.params.check_grid(&grid)?;
                for cell in self.mirror.diff(&grid) {
                    self.emit(Event::CellFlipped { completed_turns: turn, cell });
                }
                self.mirror = grid;
            }
        }

        Ok(turn)
    }

    /// Bring the mirror up to date with one turn reply
    fn apply_turn(&mut self, response: Response) -> Result<()> {
        let turn = response.current_turn;
        self.turn = turn;
        let flipped = match response.grid {
            Some(grid) => {
                let flipped = self.mirror.diff(&grid);
                self.mirror = grid;
                flipped
            }
            None => {
                self.mirror.apply_flips(&response.changed_cells)?;
                response.changed_cells
            }
        };

        for cell in flipped {
            self.emit(Event::CellFlipped { completed_turns: turn, cell });
        }
        self.emit(Event::TurnComplete { completed_turns: turn });
        Ok(())
    }

    /// Stop the turn driver and apply any reply it already delivered
    async fn stop_driver(&mut self, driver: &mut TurnDriver) {
        driver.stop().await;
        while let Ok(result) = driver.turns.try_recv() {
            let Ok(response) = result else { continue };
            if let Err(e) = self.apply_turn(response) {
                warn!("dropping buffered turn: {:#}", e);
            }
        }
    }

    /// Detach after a failed turn
    ///
    /// The broker keeps the grid at the last merged turn; quitting leaves
    /// that run resumable by a later session.
    async fn abandon(mut self, error: GolError) -> anyhow::Error {
        warn!(turn = self.turn, "turn failed: {}", error);
        match self
            .control
            .call(Operation::ClientQuit, Request::new(self.params))
            .await
        {
            Ok(response) => {
                let turn = response.current_turn;
                self.turn = turn;
                if let Some(grid) = response.grid {
                    if let Err(e) = self.write_image(&grid, turn) {
                        warn!("{:#}", e);
                    }
                }
                self.emit(Event::StateChange { completed_turns: turn, new_state: State::Quitting });
                info!(turn, "detached from broker; run can be resumed");
            }
            Err(e) => warn!("failed to detach after the failed turn: {}", e),
        }
        anyhow::Error::new(error).context(format!("Run stopped after turn {}", self.turn))
    }

    fn write_image(&mut self, grid: &Grid, turn: u32) -> Result<()> {
        let filename = self.params.output_name(turn);
        self.sink
            .write_grid(&filename, grid)
            .with_context(|| format!("Failed to write image {}", filename))?;
        self.emit(Event::ImageOutputComplete { completed_turns: turn, filename });
        Ok(())
    }

    fn finish(mut self, turn: u32) -> Result<Outcome> {
        info!(turn, alive = self.mirror.alive_count(), "run complete");
        self.emit(Event::FinalTurnComplete {
            completed_turns: turn,
            alive: self.mirror.alive_cells(),
        });
        let grid = self.mirror.clone();
        self.write_image(&grid, turn)?;
        self.emit(Event::StateChange { completed_turns: turn, new_state: State::Quitting });
        Ok(Outcome::Finished { turn })
    }

    async fn toggle_pause(&mut self) -> Result<()> {
        let response = self
            .control
            .call(Operation::TogglePause, Request::new(self.params))
            .await?;
        let new_state = if response.paused {
            State::Paused
        } else {
            State::Executing
        };
        info!(turn = response.current_turn, %new_state, "pause toggled");
        self.emit(Event::StateChange {
            completed_turns: response.current_turn,
            new_state,
        });
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<()> {
        let response = self
            .control
            .call(Operation::Snapshot, Request::new(self.params))
            .await?;
        let grid = response.grid.context("Snapshot reply carries no grid")?;
        self.write_image(&grid, response.current_turn)
    }

    async fn quit(mut self) -> Result<Outcome> {
        let response = self
            .control
            .call(Operation::ClientQuit, Request::new(self.params))
            .await
            .context("Broker refused to detach")?;
        let turn = response.current_turn;
        let grid = response.grid.context("ClientQuit reply carries no grid")?;

        info!(turn, "detached from broker; run can be resumed");
        self.write_image(&grid, turn)?;
        self.emit(Event::StateChange { completed_turns: turn, new_state: State::Quitting });
        Ok(Outcome::Quit { turn })
    }

    async fn kill(mut self) -> Result<Outcome> {
        let response = self
            .control
            .call(Operation::Kill, Request::new(self.params))
            .await
            .context("Broker refused to stop")?;
        let turn = response.current_turn;
        let grid = response.grid.unwrap_or_else(|| self.mirror.clone());

        info!(turn, "broker stopped");
        self.write_image(&grid, turn)?;
        self.emit(Event::StateChange { completed_turns: turn, new_state: State::Quitting });
        Ok(Outcome::Killed { turn })
    }
}

/// Background task issuing `AdvanceTurn` calls
///
/// Replies go through a one-slot channel, so the driver never runs more than
/// one turn ahead of the controller. It stops by itself after the last turn
/// or the first error.
struct TurnDriver {
    turns: mpsc::Receiver<GolResult<Response>>,
    handle: JoinHandle<()>,
}

impl TurnDriver {
    fn spawn(client: RpcClient, params: Params) -> Self {
        let (tx, turns) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            loop {
                let result = client.call(Operation::AdvanceTurn, Request::new(params)).await;
                let done = match &result {
                    Ok(response) => response.current_turn >= params.turns,
                    Err(_) => true,
                };
                if tx.send(result).await.is_err() || done {
                    break;
                }
            }
        });
        Self { turns, handle }
    }

    /// Stop issuing turns; no call is started after this returns
    async fn stop(&mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for TurnDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
