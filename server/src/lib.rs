//! # gridpaint Server Library
//!
//! Server side of a small real-time collaborative pixel-coloring game.
//! Clients connect over TCP, land in the lobby, and pair up in two-player
//! match rooms where they color a shared 16x16 grid against a themed,
//! timer-bounded round.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Each accepted connection gets one session task owning the socket's write
//! half plus a reader task feeding decoded frames into the session's event
//! channel. All replies and broadcasts to a connection funnel through that
//! channel, so writes are naturally serialized.
//!
//! ### Room Membership
//! The room registry is built once at startup and never changes shape: one
//! unbounded lobby plus N two-player match rooms. Membership mutation and
//! the game start/stop re-evaluation it triggers happen under a single
//! per-room lock, so a match can never phantom-start or double-start.
//!
//! ### Game Rounds
//! A match room's game activates exactly when the room fills to two players
//! and goes idle when the round timer fires or a player leaves. Round and
//! lobby-return timers carry the game's epoch and re-validate it before
//! acting, so a timer armed for an earlier round can never touch a
//! restarted game.
//!
//! ## Module Organization
//!
//! - [`network`] — TCP listener and accept loop
//! - [`session`] — per-connection worker: frame dispatch and reply paths
//! - [`room`] — membership, capacity, and game lifecycle triggers
//! - [`game`] — the match state machine and grid mutation rules
//! - [`export`] — grid snapshot rendering to raster files

pub mod export;
pub mod game;
pub mod network;
pub mod room;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide tunables, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Length of one painting round.
    pub round_duration: Duration,
    /// How long players get to look at the finished round before being
    /// pushed back to the lobby.
    pub lobby_delay: Duration,
    /// Directory grid snapshots are written into.
    pub export_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(10),
            lobby_delay: Duration::from_secs(10),
            export_dir: PathBuf::from("."),
        }
    }
}
