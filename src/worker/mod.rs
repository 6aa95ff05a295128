//! Compute worker
//!
//! A worker is a stateless RPC service. Every `Evolve` call carries the full
//! grid of the current turn as read-only context plus the band to compute;
//! nothing survives from one call to the next.
//!
//! The worker:
//! - Listens for connections from the broker
//! - Evolves bands on the blocking pool (rows run in parallel with rayon)
//! - Stops accepting and drains in-flight calls on `KillWorker`

pub mod evolve;

pub use evolve::{evolve, step, BandResult};

use crate::error::{GolError, GolResult};
use crate::rpc::protocol::{Operation, Request, Response};
use crate::rpc::server::{RpcServer, Service};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Worker service
pub struct WorkerService {
    /// Node identifier (hostname)
    node_id: String,

    shutdown: watch::Sender<bool>,
}

impl WorkerService {
    pub fn new() -> Self {
        Self {
            node_id: get_node_id(),
            shutdown: watch::channel(false).0,
        }
    }

    /// Evolve the band named in `request`
    async fn handle_evolve(&self, request: Request) -> GolResult<Response> {
        let grid = request.grid
            .ok_or_else(|| GolError::protocol(0, "Evolve requires the current grid"))?;
        let band = evolve::check_band(request.band, grid.height())?;
        let params = request.params;
        let mode = request.mode;

        debug!(node = %self.node_id, %band, ?mode, "evolving band");

        let result = tokio::task::spawn_blocking(move || {
            evolve::evolve(&grid, &params, band, mode)
        })
        .await
        .map_err(|e| GolError::protocol(0, format!("band computation panicked: {}", e)))??;

        Ok(match result {
            BandResult::Rows(rows) => Response {
                grid: Some(crate::world::Grid::from_cells(params.image_width, band.rows(), rows)?),
                ..Response::default()
            },
            BandResult::Flipped(cells) => Response {
                changed_cells: cells,
                ..Response::default()
            },
        })
    }
}

impl Default for WorkerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for WorkerService {
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
                Operation::Evolve => self.handle_evolve(request).await,
                Operation::KillWorker => {
                    info!(node = %self.node_id, "stop requested by broker");
                    self.shutdown.send_replace(true);
                    Ok(Response::default())
                }
                other => Err(GolError::protocol(0, format!("{} is not a worker operation", other))),
            }
        }
    }
}

/// Bind `listen_addr` and serve in the background until killed
pub async fn start(listen_addr: &str) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let service = Arc::new(WorkerService::new());
    let server = RpcServer::bind(listen_addr, service.clone()).await
        .context("Failed to start worker")?;
    let addr = server.local_addr()?;

    info!(node = %service.node_id, %addr, "worker ready");
    let handle = tokio::spawn(async move {
        server.run().await?;
        info!(node = %service.node_id, "worker closed");
        Ok(())
    });

    Ok((addr, handle))
}

/// Serve until killed
pub async fn run(listen_addr: &str) -> Result<()> {
    let (_, handle) = start(listen_addr).await?;
    handle.await.context("Worker task failed")?
}

/// Get node identifier (hostname)
fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| format!("worker@{}", h))
        .unwrap_or_else(|| "worker@unknown".to_string())
}
