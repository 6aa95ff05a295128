//! Wire protocol
//!
//! This module defines the messages exchanged between controller, broker and
//! workers. Every exchange is a synchronous call: the caller writes one
//! `Call`, the callee answers with exactly one `Reply` or `Error` on the same
//! connection. Messages are serialized with MessagePack (rmp-serde).
//!
//! # Message Flow
//!
//! ```text
//! Controller                  Broker                       Worker
//!     |--- Call(Initialize) ---->|                            |
//!     |<-------- Reply ----------|                            |
//!     |--- Call(AdvanceTurn) --->|---- Call(Evolve, band) --->|
//!     |                          |<--------- Reply -----------|
//!     |<-------- Reply ----------|                            |
//!     |--- Call(Kill) ---------->|---- Call(KillWorker) ----->|
//!     |<-------- Reply ----------|<--------- Reply -----------|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::error::GolError;
use crate::world::{Band, Cell, Grid, Params};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// All three roles must run the same version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted message body
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Remote operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Seed a fresh run, or resume one left behind by `ClientQuit`
    Initialize,
    /// Compute exactly one generation
    AdvanceTurn,
    /// Compute every remaining generation in one call
    AdvanceAllTurns,
    /// Live-cell count and current turn
    CountAlive,
    /// Canonical grid and current turn
    Snapshot,
    /// Flip the paused flag
    TogglePause,
    /// Detach the controller, keeping the run resumable
    ClientQuit,
    /// Stop the broker and its workers for good
    Kill,
    /// Worker: evolve one band
    Evolve,
    /// Worker: stop serving
    KillWorker,
}

impl Operation {
    /// Qualified name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "Broker.Initialize",
            Self::AdvanceTurn => "Broker.AdvanceTurn",
            Self::AdvanceAllTurns => "Broker.AdvanceAllTurns",
            Self::CountAlive => "Broker.CountAlive",
            Self::Snapshot => "Broker.Snapshot",
            Self::TogglePause => "Broker.TogglePause",
            Self::ClientQuit => "Broker.ClientQuit",
            Self::Kill => "Broker.Kill",
            Self::Evolve => "Worker.Evolve",
            Self::KillWorker => "Worker.KillWorker",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a worker reports the result of its band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultMode {
    /// The full next-generation rows of the band
    FullBand,
    /// Only the cells of the band that changed
    #[default]
    Delta,
}

/// Request body shared by every operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Run parameters, echoed on every call
    pub params: Params,

    /// Grid: the seed for `Initialize`, read-only context for `Evolve`
    pub grid: Option<Grid>,

    /// Band bounds for `Evolve`
    pub band: Option<Band>,

    /// Requested result shape for `Evolve`
    pub mode: ResultMode,
}

impl Request {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            grid: None,
            band: None,
            mode: ResultMode::default(),
        }
    }

    pub fn with_grid(mut self, grid: Grid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_band(mut self, band: Band) -> Self {
        self.band = Some(band);
        self
    }

    pub fn with_mode(mut self, mode: ResultMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Response body shared by every operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Full grid (or band rows for `Evolve` in full-band mode)
    pub grid: Option<Grid>,

    /// Cells that flipped during this call
    pub changed_cells: Vec<Cell>,

    /// Number of completed turns
    pub current_turn: u32,

    /// Live cells in the canonical grid
    pub alive_count: usize,

    /// Whether the run is paused
    pub paused: bool,
}

/// Call envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    pub op: Operation,

    pub request: Request,
}

/// Error reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Node that produced the error
    pub node_id: String,

    pub error: GolError,
}

/// Protocol message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Caller → callee
    Call(CallMessage),

    /// Callee → caller, success
    Reply(Response),

    /// Callee → caller, failure
    Error(ErrorMessage),
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    let msg_len = u32::try_from(msg_bytes.len())
        .context("Message does not fit a u32 length prefix")?;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len])
        .context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read one complete message from a stream
pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(stream).await?;
    decode_message(&frame)
}

/// Decode one message body (without its length prefix)
pub fn decode_message(body: &[u8]) -> Result<Message> {
    rmp_serde::from_slice(body)
        .context("Failed to deserialize message")
}

/// Read the body of one length-prefixed frame without decoding it
///
/// A frame that fails to decode still leaves the stream at the next frame
/// boundary.
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_MESSAGE_BYTES);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    Ok(msg_buf)
}

/// Write one message to a stream and flush it
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params {
            turns: 10,
            threads: 2,
            image_width: 4,
            image_height: 4,
        }
    }

    #[test]
    fn test_call_carries_grid_and_band() {
        let grid = Grid::from_pattern(&["#...", ".#..", "..#.", "...#"]).unwrap();
        let msg = Message::Call(CallMessage {
            protocol_version: PROTOCOL_VERSION,
            op: Operation::Evolve,
            request: Request::new(params())
                .with_grid(grid.clone())
                .with_band(Band::new(2, 3))
                .with_mode(ResultMode::FullBand),
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());

        match deserialized {
            Message::Call(call) => {
                assert_eq!(call.protocol_version, PROTOCOL_VERSION);
                assert_eq!(call.op, Operation::Evolve);
                assert_eq!(call.request.grid, Some(grid));
                assert_eq!(call.request.band, Some(Band::new(2, 3)));
                assert_eq!(call.request.mode, ResultMode::FullBand);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_error_keeps_variant() {
        let msg = Message::Error(ErrorMessage {
            node_id: "worker-1".to_string(),
            error: GolError::InvalidBand { y1: 3, y2: 1, height: 4 },
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::Error(err) => {
                assert_eq!(err.node_id, "worker-1");
                assert_eq!(err.error, GolError::InvalidBand { y1: 3, y2: 1, height: 4 });
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::Reply(Response::default());
        let bytes = serialize_message(&msg).unwrap();

        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_incomplete_buffer_rejected() {
        let bytes = serialize_message(&Message::Reply(Response::default())).unwrap();
        assert!(deserialize_message(&bytes[..2]).is_err());
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
    }

    /// Same layout as a `Grid`, without the length check
    #[derive(Serialize)]
    struct LooseGrid {
        width: usize,
        height: usize,
        cells: Vec<u8>,
    }

    #[derive(Serialize)]
    struct LooseResponse {
        grid: Option<LooseGrid>,
        changed_cells: Vec<Cell>,
        current_turn: u32,
        alive_count: usize,
        paused: bool,
    }

    /// Variants in the same order as `Message`
    #[derive(Serialize)]
    #[allow(dead_code)]
    enum LooseMessage {
        Call,
        Reply(LooseResponse),
    }

    #[test]
    fn test_short_grid_is_rejected_on_decode() {
        let reply = LooseResponse {
            grid: Some(LooseGrid { width: 5, height: 2, cells: vec![0; 5] }),
            changed_cells: Vec::new(),
            current_turn: 1,
            alive_count: 0,
            paused: false,
        };
        let body = rmp_serde::to_vec(&LooseMessage::Reply(reply)).unwrap();
        assert!(decode_message(&body).is_err());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let reply = Response {
            current_turn: 42,
            alive_count: 7,
            paused: true,
            ..Response::default()
        };

        write_message(&mut a, &Message::Reply(reply.clone())).await.unwrap();
        match read_message(&mut b).await.unwrap() {
            Message::Reply(got) => assert_eq!(got, reply),
            _ => panic!("Wrong message type"),
        }
    }
}
