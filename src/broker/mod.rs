//! Broker (coordinator)
//!
//! The broker owns the canonical grid for one run at a time and exposes it to
//! the controller over RPC. Each `AdvanceTurn` call computes exactly one
//! generation:
//!
//! 1. wait at the pause checkpoint while paused
//! 2. snapshot the grid and split it into bands
//! 3. send every band to a worker and wait for all of them (barrier)
//! 4. merge the results and increment the turn in one critical section
//!
//! Turns never overlap: a second `AdvanceTurn` waits for the first to finish.
//! Queries (`CountAlive`, `Snapshot`) and controls (`TogglePause`,
//! `ClientQuit`, `Kill`) only take the state lock briefly, so they are
//! answered while a turn is computing and always see a completed turn.

pub mod dispatch;
pub mod state;

pub use dispatch::WorkerPool;
pub use state::{Phase, PreparedTurn, RunState};

use crate::error::{GolError, GolResult};
use crate::rpc::protocol::{Operation, Request, Response, ResultMode};
use crate::rpc::server::{RpcServer, Service};
use crate::world::partition;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stateful coordinator
pub struct Broker {
    node_id: String,

    /// Canonical grid, turn counter and flags
    state: Mutex<RunState>,

    /// Woken whenever pause, quit or kill changes
    control_changed: Notify,

    /// Held for the whole of a turn
    turn_gate: tokio::sync::Mutex<()>,

    workers: WorkerPool,

    mode: ResultMode,

    shutdown: watch::Sender<bool>,
}

impl Broker {
    pub fn new(workers: WorkerPool, mode: ResultMode) -> Self {
        Self {
            node_id: get_node_id(),
            state: Mutex::new(RunState::new()),
            control_changed: Notify::new(),
            turn_gate: tokio::sync::Mutex::new(()),
            workers,
            mode,
            shutdown: watch::channel(false).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        // State is only mutated inside RunState methods that finish their
        // checks before writing, so a poisoned lock still holds a valid turn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    pub fn current_turn(&self) -> u32 {
        self.lock().current_turn()
    }

    pub fn initialize(&self, request: Request) -> GolResult<Response> {
        let params = request.params;
        partition(params.image_height, params.threads)?;

        let response = self.lock().initialize(params, request.grid)?;
        info!(
            turn = response.current_turn,
            width = params.image_width,
            height = params.image_height,
            turns = params.turns,
            threads = params.threads,
            resumed = response.grid.is_some(),
            "run initialized"
        );
        self.control_changed.notify_waiters();
        Ok(response)
    }

    /// Compute one generation
    pub async fn advance_turn(&self) -> GolResult<Response> {
        let _gate = self.turn_gate.lock().await;
        self.compute_turn().await
    }

    /// Compute every remaining generation and return the final grid
    pub async fn advance_all_turns(&self) -> GolResult<Response> {
        let _gate = self.turn_gate.lock().await;
        loop {
            let response = self.compute_turn().await?;
            let finished = self.lock().is_finished();
            if finished {
                info!(turn = response.current_turn, "all turns computed");
                return self.snapshot();
            }
        }
    }

    async fn compute_turn(&self) -> GolResult<Response> {
        self.pause_checkpoint().await?;

        let prepared = {
            let state = self.lock();
            state.prepare_turn()?
        };
        let params = prepared.params;
        let bands = partition(params.image_height, params.threads)?;

        debug!(turn = prepared.turn, bands = bands.len(), workers = self.workers.len(), "dispatching turn");
        let results = self
            .workers
            .scatter_gather(prepared.turn, &params, &prepared.grid, &bands, self.mode)
            .await?;

        let response = {
            let mut state = self.lock();
            let changed = state.merge(&prepared, results)?;
            let with_grid = self.mode == ResultMode::FullBand || state.is_finished();
            state.turn_response(changed, with_grid)?
        };

        debug!(
            turn = response.current_turn,
            alive = response.alive_count,
            flipped = response.changed_cells.len(),
            "turn merged"
        );
        Ok(response)
    }

    /// Wait while the run is paused
    ///
    /// Returns an error as soon as the run is quit or killed.
    async fn pause_checkpoint(&self) -> GolResult<()> {
        loop {
            let notified = self.control_changed.notified();
            tokio::pin!(notified);
            // Register before checking so a toggle in between is not missed
            notified.as_mut().enable();

            let paused = {
                let state = self.lock();
                state.must_wait()?
            };
            if !paused {
                return Ok(());
            }

            debug!("turn waiting at pause checkpoint");
            notified.await;
        }
    }

    pub fn count_alive(&self) -> GolResult<Response> {
        self.lock().count_alive()
    }

    pub fn snapshot(&self) -> GolResult<Response> {
        self.lock().snapshot()
    }

    pub fn toggle_pause(&self) -> GolResult<Response> {
        let response = self.lock().toggle_pause()?;
        info!(turn = response.current_turn, paused = response.paused, "pause toggled");
        self.control_changed.notify_waiters();
        Ok(response)
    }

    pub fn client_quit(&self) -> GolResult<Response> {
        let response = self.lock().client_quit()?;
        info!(turn = response.current_turn, "controller quit, state kept for resume");
        self.control_changed.notify_waiters();
        Ok(response)
    }

    /// Stop the workers, then the broker itself
    ///
    /// The run is marked killed before the workers are told to stop, so no
    /// new turn is dispatched to a worker that is going away.
    pub async fn kill(&self) -> GolResult<Response> {
        let (response, params) = {
            let mut state = self.lock();
            let response = state.kill()?;
            (response, state.params().unwrap_or_default())
        };
        self.control_changed.notify_waiters();

        info!(turn = response.current_turn, workers = self.workers.len(), "kill requested");
        self.workers.kill_all(params).await;

        self.shutdown.send_replace(true);
        Ok(response)
    }
}

impl Service for Broker {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn dispatch(
        &self,
        op: Operation,
        request: Request,
    ) -> impl Future<Output = GolResult<Response>> + Send + '_ {
        async move {
            match op {
                Operation::Initialize => self.initialize(request),
                Operation::AdvanceTurn => self.advance_turn().await,
                Operation::AdvanceAllTurns => self.advance_all_turns().await,
                Operation::CountAlive => self.count_alive(),
                Operation::Snapshot => self.snapshot(),
                Operation::TogglePause => self.toggle_pause(),
                Operation::ClientQuit => self.client_quit(),
                Operation::Kill => self.kill().await,
                Operation::Evolve | Operation::KillWorker => Err(GolError::protocol(
                    self.current_turn(),
                    format!("{} is not a broker operation", op),
                )),
            }
        }
    }
}

/// Bind `listen_addr`, register `worker_addrs` and serve in the background
///
/// Returns the bound address and a handle that resolves once the broker has
/// been killed and drained.
pub async fn start(
    listen_addr: &str,
    worker_addrs: &[String],
    mode: ResultMode,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let workers = WorkerPool::connect(worker_addrs).await;
    if workers.is_empty() {
        warn!("broker started without workers; turns will fail until restarted with some");
    }

    let broker = Arc::new(Broker::new(workers, mode));
    let server = RpcServer::bind(listen_addr, broker.clone())
        .await
        .context("Failed to start broker")?;
    let addr = server.local_addr()?;

    info!(node = %broker.node_id, %addr, workers = broker.workers.len(), ?mode, "broker ready");
    let handle = tokio::spawn(async move {
        server.run().await?;
        info!(node = %broker.node_id, "broker closed");
        Ok(())
    });

    Ok((addr, handle))
}

/// Serve until killed
pub async fn run(listen_addr: &str, worker_addrs: &[String], mode: ResultMode) -> Result<()> {
    let (_, handle) = start(listen_addr, worker_addrs, mode).await?;
    handle.await.context("Broker task failed")?
}

fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| format!("broker@{}", h))
        .unwrap_or_else(|| "broker@unknown".to_string())
}
