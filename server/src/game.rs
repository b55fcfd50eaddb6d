//! Match state machine: theme selection, round transitions, grid mutation

use log::{error, info};
use rand::seq::SliceRandom;
use shared::{Color, Grid};
use std::path::Path;

use crate::export;
use crate::room::Member;
use crate::session::server_chat;

/// Fixed pool of round themes.
pub const THEMES: &[&str] = &[
    "Flower",
    "Sunrise",
    "Waterfall",
    "House",
    "Lake",
    "Forest",
    "Apple",
    "Star",
    "City",
];

/// Per-match-room game state.
///
/// Two states: idle (`active == false`) and running. Created once per match
/// room at startup and reset at the end of every round; it lives for the
/// server's lifetime. The grid may only be mutated through [`apply_move`]
/// while the game is running.
///
/// The `epoch` counter increments on every start. Timer tasks capture it
/// when armed and compare it again before acting, which is what keeps a
/// timer from an abandoned round from ending a fresh one.
///
/// [`apply_move`]: Game::apply_move
#[derive(Debug)]
pub struct Game {
    grid: Grid,
    active: bool,
    theme: String,
    epoch: u64,
}

impl Game {
    pub fn new() -> Self {
        Self {
            grid: Grid::new(),
            active: false,
            theme: random_theme(),
            epoch: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Idle -> running. Picks a fresh theme, announces it privately to the
    /// players, and returns the new epoch for the caller to arm the round
    /// timer with.
    pub fn start(&mut self, players: &[Member]) -> u64 {
        self.active = true;
        self.epoch += 1;
        self.theme = random_theme();

        for player in players {
            player.deliver(server_chat(&format!(
                "The game is started, your theme is {}",
                self.theme
            )));
        }
        self.epoch
    }

    /// Running -> idle. Exports the finished grid (best-effort), notifies
    /// the players still present, primes a theme for the next round, and
    /// clears the grid.
    pub fn finish(&mut self, players: &[Member], room_name: &str, export_dir: &Path) {
        self.active = false;

        let path = export_dir.join(export::snapshot_filename());
        match export::save_grid_to_image(&self.grid, &path) {
            Ok(()) => info!(
                "Room {}: round finished, image saved to {}",
                room_name,
                path.display()
            ),
            Err(e) => error!("Room {}: grid snapshot export failed: {}", room_name, e),
        }

        for player in players {
            player.deliver(server_chat("The game is ended, your image is saved"));
        }

        self.theme = random_theme();
        self.grid.clear();
    }

    /// Writes `color` into the grid at `(x, y)`. Rejected while idle or
    /// when the coordinates fall outside the grid. Repeating the same move
    /// is an idempotent success.
    pub fn apply_move(&mut self, x: usize, y: usize, color: Color) -> bool {
        if !self.active {
            return false;
        }
        self.grid.set(x, y, color)
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

fn random_theme() -> String {
    let mut rng = rand::thread_rng();
    THEMES
        .choose(&mut rng)
        .copied()
        .unwrap_or("Flower")
        .to_string()
}
