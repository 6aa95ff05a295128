//! Row-band partitioning
//!
//! Each generation is split into `threads` contiguous bands of rows. The
//! slice size is `height / threads` and the remainder rows are folded into
//! the last band, so for a given (height, threads) pair the bands are always
//! the same and cover every row exactly once.

use crate::error::{GolError, GolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive row range `[y1, y2]` assigned to one worker for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub y1: usize,
    pub y2: usize,
}

impl Band {
    pub fn new(y1: usize, y2: usize) -> Self {
        Self { y1, y2 }
    }

    /// Number of rows in the band
    pub fn rows(&self) -> usize {
        self.y2 + 1 - self.y1
    }

    pub fn contains(&self, y: usize) -> bool {
        (self.y1..=self.y2).contains(&y)
    }

    /// Reject bands that are inverted or run past the last row
    pub fn validate(&self, height: usize) -> GolResult<()> {
        if self.y1 > self.y2 || self.y2 >= height {
            return Err(GolError::InvalidBand {
                y1: self.y1,
                y2: self.y2,
                height,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.y1, self.y2)
    }
}

/// Split `height` rows into `threads` bands
///
/// Fails when there are no bands to make or more bands than rows.
pub fn partition(height: usize, threads: usize) -> GolResult<Vec<Band>> {
    if threads == 0 || threads > height {
        return Err(GolError::protocol(
            0,
            format!("cannot split {} rows into {} bands", height, threads),
        ));
    }

    let slice = height / threads;
    let remainder = height % threads;

    let bands = (0..threads)
        .map(|i| {
            let y1 = i * slice;
            let mut y2 = (i + 1) * slice - 1;
            if i == threads - 1 {
                y2 += remainder;
            }
            Band::new(y1, y2)
        })
        .collect();

    Ok(bands)
}
