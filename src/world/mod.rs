//! World model
//!
//! The grid is a fixed-size, row-major matrix of single-byte cells. A cell is
//! either [`ALIVE`] (255) or [`DEAD`] (0); the byte values match the pixel
//! stream so images can be loaded and stored without conversion.
//!
//! # Modules
//!
//! - `partition`: splitting the rows of a grid into worker bands

pub mod partition;

pub use partition::{partition, Band};

use crate::error::{GolError, GolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of a live cell
pub const ALIVE: u8 = 255;

/// Value of a dead cell
pub const DEAD: u8 = 0;

/// Coordinates of a single cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Run parameters
///
/// Immutable for one run. Sent with the initial request and echoed on every
/// later call so both ends can check they agree on the geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Total number of generations to compute
    pub turns: u32,

    /// Number of bands each generation is split into
    pub threads: usize,

    /// Grid width in cells
    pub image_width: usize,

    /// Grid height in cells
    pub image_height: usize,
}

impl Params {
    /// Name of the input image, `{W}x{H}`
    pub fn image_name(&self) -> String {
        format!("{}x{}", self.image_width, self.image_height)
    }

    /// Name of an output image, `{W}x{H}x{turn}`
    pub fn output_name(&self, turn: u32) -> String {
        format!("{}x{}x{}", self.image_width, self.image_height, turn)
    }

    /// Check a grid has exactly the configured dimensions
    pub fn check_grid(&self, grid: &Grid) -> GolResult<()> {
        if grid.width() != self.image_width || grid.height() != self.image_height {
            return Err(GolError::protocol(
                0,
                format!(
                    "grid is {}x{} but parameters say {}x{}",
                    grid.width(),
                    grid.height(),
                    self.image_width,
                    self.image_height
                ),
            ));
        }
        Ok(())
    }
}

/// Fixed-size toroidal grid of cells
///
/// `cells.len() == width * height` holds for every grid, including ones
/// decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

/// Grid fields as they arrive, before the length check
#[derive(Deserialize)]
struct RawGrid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl TryFrom<RawGrid> for Grid {
    type Error = GolError;

    fn try_from(raw: RawGrid) -> GolResult<Self> {
        Grid::from_cells(raw.width, raw.height, raw.cells)
    }
}

impl Grid {
    /// Create an all-dead grid
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![DEAD; width * height],
        }
    }

    /// Create a grid from row-major cell bytes
    pub fn from_cells(width: usize, height: usize, cells: Vec<u8>) -> GolResult<Self> {
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| GolError::protocol(0, format!("{}x{} grid is too large", width, height)))?;
        if cells.len() != expected {
            return Err(GolError::protocol(
                0,
                format!(
                    "expected {} cells for a {}x{} grid, got {}",
                    expected,
                    width,
                    height,
                    cells.len()
                ),
            ));
        }
        Ok(Self { width, height, cells })
    }

    /// A grid of the same dimensions holding `cells`
    pub(crate) fn with_cells(&self, cells: Vec<u8>) -> Self {
        debug_assert_eq!(cells.len(), self.cells.len());
        Self {
            width: self.width,
            height: self.height,
            cells,
        }
    }

    /// Build a grid from text rows, `#` alive and `.` dead
    ///
    /// ```
    /// use golpulse::world::Grid;
    ///
    /// let grid = Grid::from_pattern(&[".#.", ".#.", ".#."]).unwrap();
    /// assert_eq!(grid.alive_count(), 3);
    /// ```
    pub fn from_pattern(rows: &[&str]) -> GolResult<Self> {
        let height = rows.len();
        let width = rows.first().map(|r| r.chars().count()).unwrap_or(0);
        let mut cells = Vec::with_capacity(width * height);

        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() != width {
                return Err(GolError::protocol(0, format!("pattern row {} has a different width", y)));
            }
            for ch in row.chars() {
                match ch {
                    '#' => cells.push(ALIVE),
                    '.' => cells.push(DEAD),
                    other => {
                        return Err(GolError::protocol(0, format!("unexpected pattern character {:?}", other)))
                    }
                }
            }
        }

        Self::from_cells(width, height, cells)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Value at row `y`, column `x`
    #[inline]
    pub fn get(&self, y: usize, x: usize) -> u8 {
        self.cells[y * self.width + x]
    }

    #[inline]
    pub fn is_alive(&self, y: usize, x: usize) -> bool {
        self.get(y, x) == ALIVE
    }

    pub fn set(&mut self, y: usize, x: usize, value: u8) {
        self.cells[y * self.width + x] = value;
    }

    /// Raw row-major bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cells
    }

    /// Bytes of the inclusive row range `[y1, y2]`
    pub fn rows(&self, y1: usize, y2: usize) -> &[u8] {
        &self.cells[y1 * self.width..(y2 + 1) * self.width]
    }

    /// Overwrite whole rows starting at `y1`
    pub fn write_rows(&mut self, y1: usize, rows: &[u8]) -> GolResult<()> {
        let start = y1 * self.width;
        if rows.len() % self.width.max(1) != 0 || start + rows.len() > self.cells.len() {
            return Err(GolError::protocol(
                0,
                format!("{} bytes do not fit whole rows from row {}", rows.len(), y1),
            ));
        }
        self.cells[start..start + rows.len()].copy_from_slice(rows);
        Ok(())
    }

    /// Number of live cells
    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == ALIVE).count()
    }

    /// Coordinates of every live cell in row-major order
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == ALIVE)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }

    /// Invert the named cells
    ///
    /// All coordinates are checked before anything is written, so a bad
    /// delta leaves the grid untouched.
    pub fn apply_flips(&mut self, flips: &[Cell]) -> GolResult<()> {
        if let Some(bad) = flips.iter().find(|c| c.x >= self.width || c.y >= self.height) {
            return Err(GolError::protocol(
                0,
                format!("flipped cell {} is outside a {}x{} grid", bad, self.width, self.height),
            ));
        }
        for cell in flips {
            let i = cell.y * self.width + cell.x;
            self.cells[i] = ALIVE - self.cells[i];
        }
        Ok(())
    }

    /// Cells whose value differs between `self` and `other`
    pub fn diff(&self, other: &Grid) -> Vec<Cell> {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        self.cells
            .iter()
            .zip(other.cells.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.height {
            for x in 0..self.width {
                f.write_str(if self.is_alive(y, x) { "#" } else { "." })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pattern() {
        let grid = Grid::from_pattern(&["#..", "..#"]).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert!(grid.is_alive(0, 0));
        assert!(grid.is_alive(1, 2));
        assert_eq!(grid.alive_cells(), vec![Cell::new(0, 0), Cell::new(2, 1)]);
    }

    #[test]
    fn test_from_pattern_rejects_ragged_rows() {
        assert!(Grid::from_pattern(&["#..", "#."]).is_err());
        assert!(Grid::from_pattern(&["#x."]).is_err());
    }

    #[test]
    fn test_from_cells_checks_length() {
        assert!(Grid::from_cells(2, 2, vec![0; 3]).is_err());
        assert!(Grid::from_cells(2, 2, vec![0; 4]).is_ok());
    }

    #[test]
    fn test_decode_checks_length() {
        let short: Result<Grid, _> =
            serde_json::from_str(r#"{"width":5,"height":5,"cells":[255,255,255]}"#);
        assert!(short.is_err());

        let huge: Result<Grid, _> = serde_json::from_str(&format!(
            r#"{{"width":{},"height":2,"cells":[]}}"#,
            usize::MAX
        ));
        assert!(huge.is_err());

        let grid: Grid = serde_json::from_str(r#"{"width":2,"height":1,"cells":[255,0]}"#).unwrap();
        assert_eq!(grid.alive_cells(), vec![Cell::new(0, 0)]);

        let bytes = rmp_serde::to_vec(&Grid::new(3, 2)).unwrap();
        let back: Grid = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, Grid::new(3, 2));
    }

    #[test]
    fn test_apply_flips_matches_diff() {
        let before = Grid::from_pattern(&["....", ".##.", "....", "...."]).unwrap();
        let after = Grid::from_pattern(&["..#.", ".#..", "....", "#..."]).unwrap();

        let delta = before.diff(&after);
        let mut replay = before.clone();
        replay.apply_flips(&delta).unwrap();

        assert_eq!(replay, after);
    }

    #[test]
    fn test_apply_flips_out_of_bounds_leaves_grid() {
        let mut grid = Grid::from_pattern(&["#.", ".."]).unwrap();
        let original = grid.clone();
        let err = grid.apply_flips(&[Cell::new(1, 1), Cell::new(5, 0)]);
        assert!(err.is_err());
        assert_eq!(grid, original);
    }

    #[test]
    fn test_write_rows() {
        let mut grid = Grid::new(3, 3);
        grid.write_rows(1, &[ALIVE, DEAD, ALIVE]).unwrap();
        assert_eq!(grid.rows(1, 1), &[ALIVE, DEAD, ALIVE]);
        assert!(grid.write_rows(2, &[ALIVE; 6]).is_err());
        assert!(grid.write_rows(0, &[ALIVE; 2]).is_err());
    }

    #[test]
    fn test_params_names() {
        let params = Params {
            turns: 100,
            threads: 4,
            image_width: 512,
            image_height: 256,
        };
        assert_eq!(params.image_name(), "512x256");
        assert_eq!(params.output_name(100), "512x256x100");
        assert!(params.check_grid(&Grid::new(512, 256)).is_ok());
        assert!(params.check_grid(&Grid::new(256, 512)).is_err());
    }
}
