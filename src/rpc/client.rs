//! RPC client
//!
//! One client owns one TCP connection. Calls on the same client are
//! serialized: a call holds the connection until its reply has been read, so
//! replies can never be matched to the wrong call. Roles that need
//! independent calls in flight (turn driver, poller, commands) open one
//! client each.

use crate::error::{GolError, GolResult};
use crate::rpc::protocol::*;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::trace;

/// Connection to a broker or worker
#[derive(Debug)]
pub struct RpcClient {
    addr: String,
    stream: Mutex<TcpStream>,
}

impl RpcClient {
    /// Dial `addr`
    pub async fn connect(addr: &str) -> GolResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| GolError::connection(addr, e))?;
        // Best effort; small control calls should not wait on Nagle
        let _ = stream.set_nodelay(true);

        Ok(Self {
            addr: addr.to_string(),
            stream: Mutex::new(stream),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Perform one synchronous call
    ///
    /// Transport failures come back as `GolError::Connection`; errors raised
    /// by the remote handler come back unchanged.
    pub async fn call(&self, op: Operation, request: Request) -> GolResult<Response> {
        let mut stream = self.stream.lock().await;

        trace!(addr = %self.addr, %op, "calling");

        let call = Message::Call(CallMessage {
            protocol_version: PROTOCOL_VERSION,
            op,
            request,
        });
        write_message(&mut *stream, &call)
            .await
            .map_err(|e| GolError::connection(&self.addr, format!("{:#}", e)))?;

        let frame = read_frame(&mut *stream)
            .await
            .map_err(|e| GolError::connection(&self.addr, format!("{:#}", e)))?;

        match decode_message(&frame) {
            Ok(Message::Reply(response)) => Ok(response),
            Ok(Message::Error(err)) => Err(err.error),
            Ok(Message::Call(_)) => Err(GolError::protocol(
                0,
                format!("{} answered {} with a call", self.addr, op),
            )),
            Err(e) => Err(GolError::protocol(
                0,
                format!("malformed reply from {}: {:#}", self.addr, e),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match RpcClient::connect(&addr).await {
            Err(GolError::Connection { addr: a, .. }) => assert_eq!(a, addr),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }
}
