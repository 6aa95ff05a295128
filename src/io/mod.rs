//! Pixel I/O
//!
//! The controller reads its seed grid from a [`PixelSource`] and writes
//! snapshots to a [`PixelSink`]. Images are addressed by name: the input is
//! `{W}x{H}`, outputs are `{W}x{H}x{turn}`. Pixels are row-major bytes, 255
//! for alive and 0 for dead.
//!
//! Two implementations:
//! - [`pgm::PgmImages`]: binary PGM files in an input and an output directory
//! - [`MemoryImages`]: a shared in-memory store, used by tests and embedders

pub mod pgm;

pub use pgm::PgmImages;

use crate::world::{Grid, Params};
use crate::Result;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Where seed grids come from
pub trait PixelSource: Send {
    /// Read the input image for `params`
    fn read_grid(&mut self, params: &Params) -> Result<Grid>;
}

/// Where snapshots go
pub trait PixelSink: Send {
    /// Store `grid` under `name`
    fn write_grid(&mut self, name: &str, grid: &Grid) -> Result<()>;
}

#[derive(Debug, Default)]
struct Store {
    inputs: HashMap<String, Grid>,
    outputs: Vec<(String, Grid)>,
}

/// In-memory image store
///
/// Clones share the same store, so a test can hand one clone to the
/// controller and inspect the outputs through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryImages {
    store: Arc<Mutex<Store>>,
}

impl MemoryImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `grid` available as the input image of its size
    pub fn with_input(self, grid: Grid) -> Self {
        let name = format!("{}x{}", grid.width(), grid.height());
        self.lock().inputs.insert(name, grid);
        self
    }

    /// Every image written so far, in write order
    pub fn outputs(&self) -> Vec<(String, Grid)> {
        self.lock().outputs.clone()
    }

    /// Most recent image written under `name`
    pub fn output(&self, name: &str) -> Option<Grid> {
        self.lock()
            .outputs
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, g)| g.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PixelSource for MemoryImages {
    fn read_grid(&mut self, params: &Params) -> Result<Grid> {
        let name = params.image_name();
        let grid = self
            .lock()
            .inputs
            .get(&name)
            .cloned()
            .with_context(|| format!("No input image named {}", name))?;
        params.check_grid(&grid)?;
        Ok(grid)
    }
}

impl PixelSink for MemoryImages {
    fn write_grid(&mut self, name: &str, grid: &Grid) -> Result<()> {
        self.lock().outputs.push((name.to_string(), grid.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_images_share_store() {
        let grid = Grid::from_pattern(&["#..", ".#.", "..#"]).unwrap();
        let images = MemoryImages::new().with_input(grid.clone());
        let params = Params {
            turns: 1,
            threads: 1,
            image_width: 3,
            image_height: 3,
        };

        let mut handle = images.clone();
        assert_eq!(handle.read_grid(&params).unwrap(), grid);
        handle.write_grid(&params.output_name(4), &grid).unwrap();

        assert_eq!(images.output("3x3x4"), Some(grid));
        assert_eq!(images.outputs().len(), 1);
    }

    #[test]
    fn test_memory_images_missing_input() {
        let mut images = MemoryImages::new();
        let params = Params {
            turns: 1,
            threads: 1,
            image_width: 16,
            image_height: 16,
        };
        let err = images.read_grid(&params).unwrap_err();
        assert!(err.to_string().contains("16x16"));
    }
}
