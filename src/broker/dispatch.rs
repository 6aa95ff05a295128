//! Worker pool and per-turn scatter/gather
//!
//! Band `i` of a turn goes to worker `i mod N`. All bands are sent before any
//! reply is awaited, and every reply is awaited before the turn is judged:
//! a turn is merged only when every band came back and passed its checks.

use crate::error::{GolError, GolResult};
use crate::rpc::client::RpcClient;
use crate::rpc::protocol::{Operation, Request, Response, ResultMode};
use crate::worker::BandResult;
use crate::world::{Band, Grid, Params};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long a kill cascade waits on each worker
const KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// One registered worker address with a lazily (re)established connection
#[derive(Debug)]
pub struct WorkerClient {
    addr: String,
    conn: Mutex<Option<Arc<RpcClient>>>,
}

impl WorkerClient {
    fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connection(&self) -> GolResult<Arc<RpcClient>> {
        let mut conn = self.conn.lock().await;
        if let Some(client) = conn.as_ref() {
            return Ok(client.clone());
        }
        let client = Arc::new(RpcClient::connect(&self.addr).await?);
        debug!(addr = %self.addr, "connected to worker");
        *conn = Some(client.clone());
        Ok(client)
    }

    async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Call the worker, dialling first if needed
    ///
    /// A transport failure drops the connection so the next call redials.
    pub async fn call(&self, op: Operation, request: Request) -> GolResult<Response> {
        let client = self.connection().await?;
        let result = client.call(op, request).await;
        if let Err(GolError::Connection { .. }) = &result {
            self.conn.lock().await.take();
        }
        result
    }
}

/// Registered workers, in registration order
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<Arc<WorkerClient>>,
}

impl WorkerPool {
    /// Register `addrs` and try to dial each one
    ///
    /// A worker that cannot be reached yet is kept and dialled again on the
    /// first turn that needs it.
    pub async fn connect(addrs: &[String]) -> Self {
        let workers: Vec<_> = addrs.iter().map(|a| Arc::new(WorkerClient::new(a))).collect();

        for (i, worker) in workers.iter().enumerate() {
            match worker.connection().await {
                Ok(_) => info!(index = i, addr = %worker.addr, "worker connected"),
                Err(e) => warn!(index = i, addr = %worker.addr, "worker unavailable, will retry: {}", e),
            }
        }

        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub async fn connected(&self) -> usize {
        let mut n = 0;
        for worker in &self.workers {
            if worker.is_connected().await {
                n += 1;
            }
        }
        n
    }

    /// Evolve every band of `grid` for turn `turn`
    ///
    /// Returns one result per band, in band order. On failure the error names
    /// the first band (by index) that failed; nothing has been merged.
    pub async fn scatter_gather(
        &self,
        turn: u32,
        params: &Params,
        grid: &Grid,
        bands: &[Band],
        mode: ResultMode,
    ) -> GolResult<Vec<(Band, BandResult)>> {
        if self.workers.is_empty() {
            return Err(GolError::conflict(turn, "no workers are registered"));
        }

        let mut tasks = Vec::with_capacity(bands.len());
        for (i, band) in bands.iter().enumerate() {
            let worker = self.workers[i % self.workers.len()].clone();
            let request = Request::new(*params)
                .with_grid(grid.clone())
                .with_band(*band)
                .with_mode(mode);
            tasks.push(tokio::spawn(async move {
                worker.call(Operation::Evolve, request).await
            }));
        }

        // Barrier: wait for every band before judging the turn
        let mut results = Vec::with_capacity(bands.len());
        let mut failure = None;
        for (i, (task, band)) in tasks.into_iter().zip(bands).enumerate() {
            let outcome = match task.await {
                Ok(Ok(response)) => check_band_response(response, *band, params.image_width, mode),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("band task failed: {}", e)),
            };

            match outcome {
                Ok(result) => results.push((*band, result)),
                Err(reason) => {
                    warn!(turn, band_index = i, %band, "band failed: {}", reason);
                    failure.get_or_insert(GolError::PartialFailure {
                        turn,
                        band_index: i,
                        y1: band.y1,
                        y2: band.y2,
                        reason,
                    });
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    /// Ask every worker to stop; unreachable workers are skipped
    pub async fn kill_all(&self, params: Params) {
        for (i, worker) in self.workers.iter().enumerate() {
            let call = worker.call(Operation::KillWorker, Request::new(params));
            match tokio::time::timeout(KILL_TIMEOUT, call).await {
                Ok(Ok(_)) => info!(index = i, addr = %worker.addr, "worker stopped"),
                Ok(Err(e)) => warn!(index = i, addr = %worker.addr, "worker did not acknowledge stop: {}", e),
                Err(_) => warn!(index = i, addr = %worker.addr, "worker stop timed out"),
            }
        }
    }
}

/// Check a worker reply against the band it was asked for
fn check_band_response(
    response: Response,
    band: Band,
    width: usize,
    mode: ResultMode,
) -> Result<BandResult, String> {
    match mode {
        ResultMode::FullBand => {
            let rows = response
                .grid
                .ok_or_else(|| "reply carries no rows".to_string())?;
            if rows.width() != width || rows.height() != band.rows() {
                return Err(format!(
                    "reply is {}x{}, expected {}x{}",
                    rows.width(),
                    rows.height(),
                    width,
                    band.rows()
                ));
            }
            Ok(BandResult::Rows(rows.into_bytes()))
        }
        ResultMode::Delta => {
            if let Some(cell) = response
                .changed_cells
                .iter()
                .find(|c| !band.contains(c.y) || c.x >= width)
            {
                return Err(format!("flipped cell {} lies outside band {}", cell, band));
            }
            Ok(BandResult::Flipped(response.changed_cells))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Cell;

    #[test]
    fn test_check_full_band_dimensions() {
        let band = Band::new(2, 3);
        let ok = Response {
            grid: Some(Grid::new(4, 2)),
            ..Response::default()
        };
        assert!(check_band_response(ok, band, 4, ResultMode::FullBand).is_ok());

        let short = Response {
            grid: Some(Grid::new(4, 1)),
            ..Response::default()
        };
        assert!(check_band_response(short, band, 4, ResultMode::FullBand).is_err());

        assert!(check_band_response(Response::default(), band, 4, ResultMode::FullBand).is_err());
    }

    #[test]
    fn test_check_delta_stays_in_band() {
        let band = Band::new(2, 3);
        let inside = Response {
            changed_cells: vec![Cell::new(0, 2), Cell::new(3, 3)],
            ..Response::default()
        };
        assert!(check_band_response(inside, band, 4, ResultMode::Delta).is_ok());

        let outside = Response {
            changed_cells: vec![Cell::new(0, 4)],
            ..Response::default()
        };
        assert!(check_band_response(outside, band, 4, ResultMode::Delta).is_err());

        let too_wide = Response {
            changed_cells: vec![Cell::new(4, 2)],
            ..Response::default()
        };
        assert!(check_band_response(too_wide, band, 4, ResultMode::Delta).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_kept_for_retry() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pool = WorkerPool::connect(&[addr]).await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.connected().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_band_reply_fails_turn() {
        use crate::rpc::protocol::read_frame;
        use tokio::io::AsyncWriteExt;

        // Answers every call with a body that does not decode
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while read_frame(&mut stream).await.is_ok() {
                let body = [0xc1u8];
                stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
                stream.write_all(&body).await.unwrap();
            }
        });

        let pool = WorkerPool::connect(&[addr]).await;
        let grid = Grid::new(4, 4);
        let params = Params {
            turns: 1,
            threads: 1,
            image_width: 4,
            image_height: 4,
        };
        let err = pool
            .scatter_gather(2, &params, &grid, &[Band::new(0, 3)], ResultMode::FullBand)
            .await
            .unwrap_err();
        match err {
            GolError::PartialFailure { turn, band_index, reason, .. } => {
                assert_eq!((turn, band_index), (2, 0));
                assert!(reason.contains("malformed reply"), "{}", reason);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
        // Decoding failed but the stream is intact
        assert_eq!(pool.connected().await, 1);
    }

    #[tokio::test]
    async fn test_scatter_without_workers() {
        let pool = WorkerPool::default();
        let grid = Grid::new(2, 2);
        let params = Params {
            turns: 1,
            threads: 1,
            image_width: 2,
            image_height: 2,
        };
        let err = pool
            .scatter_gather(0, &params, &grid, &[Band::new(0, 1)], ResultMode::Delta)
            .await
            .unwrap_err();
        assert!(matches!(err, GolError::StateConflict { .. }));
    }
}
