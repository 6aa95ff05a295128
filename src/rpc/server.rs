//! RPC server
//!
//! Accept loop shared by the broker and the workers:
//! - one task per accepted connection, each serving calls in order
//! - every handler in progress is counted as in flight
//! - when the service raises its shutdown signal the listener is closed at
//!   once, idle connections are dropped, and `run` only returns after every
//!   connection task (and so every in-flight handler) has finished

use crate::error::GolResult;
use crate::rpc::protocol::*;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Handler side of the protocol
pub trait Service: Send + Sync + 'static {
    /// Identifier reported in error replies
    fn node_id(&self) -> &str;

    /// Signal that flips to `true` when the service wants to stop
    fn shutdown_signal(&self) -> watch::Receiver<bool>;

    /// Handle one call
    fn dispatch(
        &self,
        op: Operation,
        request: Request,
    ) -> impl Future<Output = GolResult<Response>> + Send + '_;
}

/// Number of handlers currently running
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.0.clone())
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Listening server bound to an address
pub struct RpcServer<S: Service> {
    listener: TcpListener,
    service: Arc<S>,
    in_flight: InFlight,
}

impl<S: Service> RpcServer<S> {
    /// Bind `addr` (use port 0 for an ephemeral port)
    pub async fn bind(addr: &str, service: Arc<S>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Self {
            listener,
            service,
            in_flight: InFlight::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
            .context("Failed to read listener address")
    }

    /// Handle to the in-flight counter
    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Serve until the shutdown signal is raised, then drain
    pub async fn run(self) -> Result<()> {
        let Self { listener, service, in_flight } = self;
        let mut shutdown = service.shutdown_signal();
        let mut connections = JoinSet::new();

        info!(node = service.node_id(), addr = ?listener.local_addr().ok(), "listening");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            service.clone(),
                            service.shutdown_signal(),
                            in_flight.clone(),
                        ));
                    }
                    Err(e) => {
                        // Accept failures are per-connection, keep listening
                        warn!(error = %e, "accept failed");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        info!(
            node = service.node_id(),
            in_flight = in_flight.count(),
            connections = connections.len(),
            "listener closed, draining"
        );

        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "connection task failed");
            }
        }

        info!(node = service.node_id(), "all handlers finished");
        Ok(())
    }
}

/// Serve calls on one connection until it closes or shutdown is raised
///
/// A call that has been read always runs to completion and gets its reply
/// written; shutdown is only observed between calls.
async fn serve_connection<S: Service>(
    mut stream: TcpStream,
    peer: SocketAddr,
    service: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
    in_flight: InFlight,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let frame = tokio::select! {
            frame = read_frame(&mut stream) => frame,
            _ = shutdown.changed() => break,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%peer, "connection closed: {:#}", e);
                break;
            }
        };

        let reply = match decode_message(&frame) {
            Ok(Message::Call(call)) => {
                let _guard = in_flight.enter();
                handle_call(&*service, call).await
            }
            Ok(other) => {
                warn!(%peer, ?other, "expected a call");
                break;
            }
            // The frame was consumed whole, so the connection stays usable
            Err(e) => {
                warn!(%peer, "rejecting malformed call: {:#}", e);
                Message::Error(ErrorMessage {
                    node_id: service.node_id().to_string(),
                    error: crate::error::GolError::protocol(0, format!("malformed call: {:#}", e)),
                })
            }
        };

        if let Err(e) = write_message(&mut stream, &reply).await {
            warn!(%peer, "failed to send reply: {:#}", e);
            break;
        }
    }
}

async fn handle_call<S: Service>(service: &S, call: CallMessage) -> Message {
    if call.protocol_version != PROTOCOL_VERSION {
        return Message::Error(ErrorMessage {
            node_id: service.node_id().to_string(),
            error: crate::error::GolError::protocol(
                0,
                format!(
                    "Protocol version mismatch: caller={}, {}={}",
                    call.protocol_version,
                    service.node_id(),
                    PROTOCOL_VERSION
                ),
            ),
        });
    }

    let op = call.op;
    match service.dispatch(op, call.request).await {
        Ok(response) => Message::Reply(response),
        Err(error) => {
            debug!(%op, %error, "call failed");
            Message::Error(ErrorMessage {
                node_id: service.node_id().to_string(),
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GolError;
    use crate::rpc::client::RpcClient;
    use crate::world::Params;
    use std::time::Duration;

    /// Echoes the turn it is asked for and stops on KillWorker
    struct EchoService {
        shutdown: watch::Sender<bool>,
    }

    impl Service for EchoService {
        fn node_id(&self) -> &str {
            "echo"
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
                    Operation::CountAlive => {
                        // Slow handler to exercise draining
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(Response {
                            current_turn: request.params.turns,
                            ..Response::default()
                        })
                    }
                    Operation::KillWorker => {
                        self.shutdown.send_replace(true);
                        Ok(Response::default())
                    }
                    other => Err(GolError::conflict(0, format!("{} unsupported", other))),
                }
            }
        }
    }

    fn params(turns: u32) -> Params {
        Params {
            turns,
            threads: 1,
            image_width: 1,
            image_height: 1,
        }
    }

    #[tokio::test]
    async fn test_call_and_error_reply() {
        let service = Arc::new(EchoService { shutdown: watch::channel(false).0 });
        let server = RpcServer::bind("127.0.0.1:0", service).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let server_task = tokio::spawn(server.run());

        let client = RpcClient::connect(&addr).await.unwrap();
        let response = client.call(Operation::CountAlive, Request::new(params(9))).await.unwrap();
        assert_eq!(response.current_turn, 9);

        let err = client.call(Operation::Snapshot, Request::new(params(0))).await.unwrap_err();
        assert!(matches!(err, GolError::StateConflict { .. }));

        client.call(Operation::KillWorker, Request::new(params(0))).await.unwrap();
        drop(client);
        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_call_gets_protocol_error() {
        use tokio::io::AsyncWriteExt;

        let service = Arc::new(EchoService { shutdown: watch::channel(false).0 });
        let server = RpcServer::bind("127.0.0.1:0", service.clone()).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        // 0xc1 is never valid MessagePack
        let body = [0xc1u8, 0x00];
        stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();

        match read_message(&mut stream).await.unwrap() {
            Message::Error(err) => assert!(matches!(err.error, GolError::Protocol { .. })),
            other => panic!("expected an error reply, got {:?}", other),
        }

        // Same connection still serves well-formed calls
        let call = Message::Call(CallMessage {
            protocol_version: PROTOCOL_VERSION,
            op: Operation::CountAlive,
            request: Request::new(params(4)),
        });
        write_message(&mut stream, &call).await.unwrap();
        match read_message(&mut stream).await.unwrap() {
            Message::Reply(response) => assert_eq!(response.current_turn, 4),
            other => panic!("expected a reply, got {:?}", other),
        }

        service.shutdown.send_replace(true);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_handler() {
        let service = Arc::new(EchoService { shutdown: watch::channel(false).0 });
        let server = RpcServer::bind("127.0.0.1:0", service.clone()).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let in_flight = server.in_flight();
        let server_task = tokio::spawn(server.run());

        let slow = RpcClient::connect(&addr).await.unwrap();
        let slow_call = tokio::spawn(async move {
            slow.call(Operation::CountAlive, Request::new(params(3))).await
        });

        // Let the slow call reach its handler, then stop the server
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(in_flight.count(), 1);
        let killer = RpcClient::connect(&addr).await.unwrap();
        killer.call(Operation::KillWorker, Request::new(params(0))).await.unwrap();

        // The in-flight call still gets its reply
        let response = slow_call.await.unwrap().unwrap();
        assert_eq!(response.current_turn, 3);
        assert_eq!(in_flight.count(), 0);

        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Listener is gone
        assert!(RpcClient::connect(&addr).await.is_err());
    }
}
