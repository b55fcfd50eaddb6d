//! Grid snapshot rendering
//!
//! Renders a finished (or in-progress) grid to a raster file. Invoked on
//! every round end and on explicit `save_image` requests; failures are
//! reported to the caller and logged there, never treated as fatal.

use image::{Rgb, RgbImage};
use shared::{Color, Grid, GRID_SIZE};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Output pixels per grid cell.
pub const CELL_SCALE: u32 = 16;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image write failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Renders each grid cell as a `CELL_SCALE` square block and writes the
/// result to `path`; the format is chosen by the file extension.
pub fn save_grid_to_image(grid: &Grid, path: &Path) -> Result<(), ExportError> {
    let side = GRID_SIZE as u32 * CELL_SCALE;
    let mut img = RgbImage::new(side, side);

    for (px, py, pixel) in img.enumerate_pixels_mut() {
        let cell = grid
            .get((px / CELL_SCALE) as usize, (py / CELL_SCALE) as usize)
            .unwrap_or(Color::WHITE);
        *pixel = Rgb([cell.r, cell.g, cell.b]);
    }

    img.save(path)?;
    Ok(())
}

/// Timestamped snapshot filename, unique enough for one server process.
pub fn snapshot_filename() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    format!("game_field_{}.png", millis)
}
