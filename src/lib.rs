//! GolPulse - distributed Game of Life
//!
//! GolPulse evolves a toroidal Game of Life grid across several machines.
//!
//! # Architecture
//!
//! - **Workers**: stateless services that evolve one horizontal band of the
//!   grid per call
//! - **Broker**: owns the canonical grid, splits every turn into bands, fans
//!   them out to the workers and merges the results behind a barrier
//! - **Controller**: reads the seed image, drives the run turn by turn,
//!   reports events and handles pause, screenshot, quit and kill commands
//!
//! All three talk over a length-prefixed MessagePack RPC protocol.

pub mod broker;
pub mod config;
pub mod controller;
pub mod error;
pub mod io;
pub mod rpc;
pub mod worker;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use error::{GolError, GolResult};
pub use world::{Cell, Grid, Params};

/// Result type used for process plumbing throughout GolPulse
pub type Result<T> = anyhow::Result<T>;
