//! Wire protocol shared between the gridpaint server and its clients
//!
//! Defines the message schema, the pixel grid data model, and the framing
//! codec. Every message travels as a length-prefixed frame:
//!
//! - 4 bytes: payload length (u32, big-endian)
//! - 4 bytes: protocol version (u32, big-endian)
//! - N bytes: bincode-encoded [`Message`]
//!
//! The explicit length prefix means payload bytes never need escaping, and
//! the version field lets either side reject a peer speaking an incompatible
//! schema before attempting to decode anything.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Side length of the shared pixel grid.
pub const GRID_SIZE: usize = 16;
/// Bumped on any change to [`Message`] or the frame layout.
pub const PROTOCOL_VERSION: u32 = 1;
/// Upper bound on a single frame's payload; larger frames are rejected
/// before allocation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
/// Name of the unbounded waiting room every session starts in.
pub const LOBBY_ROOM: &str = "0";

/// Errors produced while encoding, decoding, or framing messages.
///
/// Every variant is fatal to the connection it occurred on; none of them
/// are retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),
    #[error("peer speaks protocol version {0}, expected {PROTOCOL_VERSION}")]
    VersionMismatch(u32),
}

/// An RGB color cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Grid background.
    pub const WHITE: Color = Color {
        r: 0xFF,
        g: 0xFF,
        b: 0xFF,
    };
    /// Default brush color for a fresh session.
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    /// Parses a `#RRGGBB` string, case-insensitive. Returns `None` for
    /// anything malformed.
    pub fn from_hex(s: &str) -> Option<Color> {
        let digits = s.strip_prefix('#')?;
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
        let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
        let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
        Some(Color { r, g, b })
    }

    /// Formats as uppercase `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Fixed-size square matrix of color cells.
///
/// Created with every cell set to the background color and never resized.
/// All access is bounds-checked; out-of-range coordinates are reported to
/// the caller instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    cells: Vec<Color>,
}

impl Grid {
    pub fn new() -> Self {
        Self {
            cells: vec![Color::WHITE; GRID_SIZE * GRID_SIZE],
        }
    }

    /// Returns the cell at `(x, y)`, or `None` if out of range.
    pub fn get(&self, x: usize, y: usize) -> Option<Color> {
        if x < GRID_SIZE && y < GRID_SIZE {
            Some(self.cells[y * GRID_SIZE + x])
        } else {
            None
        }
    }

    /// Writes `color` into `(x, y)`. Returns false if out of range.
    pub fn set(&mut self, x: usize, y: usize, color: Color) -> bool {
        if x < GRID_SIZE && y < GRID_SIZE {
            self.cells[y * GRID_SIZE + x] = color;
            true
        } else {
            false
        }
    }

    /// Resets every cell to the background color.
    pub fn clear(&mut self) {
        self.cells.fill(Color::WHITE);
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

/// One wire message, one variant per protocol type.
///
/// Colors travel as `#RRGGBB` strings so the schema matches what clients
/// show in their pickers; the server parses them with [`Color::from_hex`].
/// The move direction is split in two: clients send [`Message::Move`]
/// (coordinates only, the server knows the sender's brush color) and the
/// server broadcasts [`Message::Cell`] with the color filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Free-text chat line.
    Chat { text: String },
    /// Client request to paint a cell with its current brush color.
    Move { x: u8, y: u8 },
    /// Server notice that a cell changed color.
    Cell { x: u8, y: u8, color: String },
    /// Client brush color change.
    Color { color: String },
    /// Client display-name change.
    Name { name: String },
    /// Client request to export the current grid to an image file.
    SaveImage,
    /// Client request to switch rooms.
    Room { name: String },
    /// Server signal that the match is over and the client should reset
    /// its local view.
    GameEnd,
}

/// Writes one length-prefixed frame carrying `msg`.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(msg).map_err(ProtocolError::Encode)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&PROTOCOL_VERSION.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one complete frame and decodes its payload.
///
/// Blocks until the full frame has arrived. A closed connection surfaces
/// as [`ProtocolError::Io`] with `UnexpectedEof`.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    reader.read_exact(&mut header).await?;
    let version = u32::from_be_bytes(header);
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(ProtocolError::Decode)
}
