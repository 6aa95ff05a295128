//! RPC layer
//!
//! Controller, broker and workers talk over TCP with synchronous
//! request/response calls.
//!
//! # Modules
//!
//! - `protocol`: Message definitions, serialization and framing
//! - `client`: One connection, one call at a time
//! - `server`: Accept loop with draining shutdown, generic over a [`Service`]

pub mod client;
pub mod protocol;
pub mod server;

// Re-export key types
pub use client::RpcClient;
pub use protocol::{
    Message,
    Operation,
    Request,
    Response,
    ResultMode,
    PROTOCOL_VERSION,
};
pub use server::{RpcServer, Service};
