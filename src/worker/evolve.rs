//! Band evolution
//!
//! Pure functions from (grid, band) to the next generation of that band. The
//! grid is only ever read through a shared borrow, so a worker can evolve
//! several bands of the same snapshot at once without copying it.
//!
//! Rules (toroidal Moore neighbourhood, both axes wrap):
//! - a live cell with fewer than 2 or more than 3 live neighbours dies
//! - a dead cell with exactly 3 live neighbours is born
//! - every other cell keeps its value

use crate::error::{GolError, GolResult};
use crate::rpc::protocol::ResultMode;
use crate::world::{Band, Cell, Grid, Params, ALIVE, DEAD};
use rayon::prelude::*;

/// Result of evolving one band
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandResult {
    /// Next-generation bytes of every row in the band, row-major
    Rows(Vec<u8>),
    /// Cells of the band whose value changes
    Flipped(Vec<Cell>),
}

/// Live neighbours of `(y, x)`, wrapping at every edge
#[inline]
pub fn count_neighbours(grid: &Grid, y: usize, x: usize) -> usize {
    let (h, w) = (grid.height(), grid.width());
    let rows = [(y + h - 1) % h, y, (y + 1) % h];
    let cols = [(x + w - 1) % w, x, (x + 1) % w];

    let mut count = 0;
    for (i, &ny) in rows.iter().enumerate() {
        for (j, &nx) in cols.iter().enumerate() {
            if i == 1 && j == 1 {
                continue;
            }
            if grid.is_alive(ny, nx) {
                count += 1;
            }
        }
    }
    count
}

/// Next value of a cell given its current value and live neighbour count
#[inline]
pub fn next_value(current: u8, neighbours: usize) -> u8 {
    match (current, neighbours) {
        (ALIVE, n) if !(2..=3).contains(&n) => DEAD,
        (DEAD, 3) => ALIVE,
        (value, _) => value,
    }
}

/// Next-generation rows of `band`
pub fn next_rows(grid: &Grid, band: Band) -> Vec<u8> {
    let width = grid.width();
    let mut out = vec![DEAD; band.rows() * width];

    out.par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(i, row)| {
            let y = band.y1 + i;
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = next_value(grid.get(y, x), count_neighbours(grid, y, x));
            }
        });

    out
}

/// Cells of `band` that change in the next generation
pub fn flipped_cells(grid: &Grid, band: Band) -> Vec<Cell> {
    (band.y1..=band.y2)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..grid.width()).filter_map(move |x| {
                let current = grid.get(y, x);
                (next_value(current, count_neighbours(grid, y, x)) != current)
                    .then_some(Cell::new(x, y))
            })
        })
        .collect()
}

/// Evolve one band of `grid`
///
/// Rejects bands outside the grid and grids that do not match `params`.
pub fn evolve(grid: &Grid, params: &Params, band: Band, mode: ResultMode) -> GolResult<BandResult> {
    params.check_grid(grid)?;
    band.validate(grid.height())?;

    Ok(match mode {
        ResultMode::FullBand => BandResult::Rows(next_rows(grid, band)),
        ResultMode::Delta => BandResult::Flipped(flipped_cells(grid, band)),
    })
}

/// Whole-grid generation, computed as a single band
pub fn step(grid: &Grid) -> Grid {
    if grid.height() == 0 || grid.width() == 0 {
        return grid.clone();
    }
    grid.with_cells(next_rows(grid, Band::new(0, grid.height() - 1)))
}

/// Reject band bounds before doing any work
pub fn check_band(band: Option<Band>, height: usize) -> GolResult<Band> {
    let band = band.ok_or_else(|| GolError::protocol(0, "Evolve requires band bounds"))?;
    band.validate(height)?;
    Ok(band)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_for(grid: &Grid) -> Params {
        Params {
            turns: 1,
            threads: 1,
            image_width: grid.width(),
            image_height: grid.height(),
        }
    }

    #[test]
    fn test_rules() {
        assert_eq!(next_value(ALIVE, 1), DEAD);
        assert_eq!(next_value(ALIVE, 2), ALIVE);
        assert_eq!(next_value(ALIVE, 3), ALIVE);
        assert_eq!(next_value(ALIVE, 4), DEAD);
        assert_eq!(next_value(DEAD, 3), ALIVE);
        assert_eq!(next_value(DEAD, 2), DEAD);
        assert_eq!(next_value(DEAD, 4), DEAD);
    }

    #[test]
    fn test_toroidal_wrap() {
        // (0,0) sees the opposite corner
        let grid = Grid::from_pattern(&["#...", "....", "....", "...#"]).unwrap();
        assert_eq!(count_neighbours(&grid, 0, 0), 1);
        assert_eq!(count_neighbours(&grid, 3, 3), 1);
        // and cells across each edge
        assert_eq!(count_neighbours(&grid, 0, 3), 2);
        assert_eq!(count_neighbours(&grid, 3, 0), 2);
    }

    #[test]
    fn test_blinker_period_two() {
        let grid = Grid::from_pattern(&[
            ".....",
            ".....",
            ".###.",
            ".....",
            ".....",
        ])
        .unwrap();
        let vertical = Grid::from_pattern(&[
            ".....",
            "..#..",
            "..#..",
            "..#..",
            ".....",
        ])
        .unwrap();

        let once = step(&grid);
        assert_eq!(once, vertical);
        assert_eq!(step(&once), grid);
    }

    #[test]
    fn test_step_keeps_shape() {
        let grid = Grid::from_pattern(&["......", ".###..", "......"]).unwrap();
        let next = step(&grid);
        assert_eq!((next.width(), next.height()), (6, 3));
        assert_eq!(next, Grid::from_pattern(&["..#...", "..#...", "..#..."]).unwrap());
    }

    #[test]
    fn test_lone_cell_dies() {
        let grid = Grid::from_pattern(&["....", ".#..", "....", "...."]).unwrap();
        assert_eq!(step(&grid).alive_count(), 0);
    }

    #[test]
    fn test_l_shape_births_missing_corner() {
        let grid = Grid::from_pattern(&[
            "......",
            ".##...",
            ".#....",
            "......",
            "......",
            "......",
        ])
        .unwrap();
        let band = Band::new(0, 5);

        let flipped = match evolve(&grid, &params_for(&grid), band, ResultMode::Delta).unwrap() {
            BandResult::Flipped(cells) => cells,
            other => panic!("expected flipped cells, got {:?}", other),
        };

        assert_eq!(flipped, vec![Cell::new(2, 2)]);
    }

    #[test]
    fn test_delta_matches_full_band() {
        let grid = Grid::from_pattern(&[
            "#..#..#.",
            ".##..#..",
            "#...##.#",
            "..#.#...",
            ".#...##.",
            "##..#..#",
        ])
        .unwrap();
        let params = params_for(&grid);
        let band = Band::new(1, 4);

        let rows = match evolve(&grid, &params, band, ResultMode::FullBand).unwrap() {
            BandResult::Rows(rows) => rows,
            other => panic!("expected rows, got {:?}", other),
        };
        let flipped = match evolve(&grid, &params, band, ResultMode::Delta).unwrap() {
            BandResult::Flipped(cells) => cells,
            other => panic!("expected flipped cells, got {:?}", other),
        };

        let mut from_rows = grid.clone();
        from_rows.write_rows(band.y1, &rows).unwrap();
        let mut from_flips = grid.clone();
        from_flips.apply_flips(&flipped).unwrap();

        assert_eq!(from_rows, from_flips);
        assert_eq!(grid.diff(&from_rows), flipped);
    }

    #[test]
    fn test_evolve_does_not_touch_rows_outside_band() {
        let grid = Grid::from_pattern(&["###", "###", "###"]).unwrap();
        let flipped = match evolve(&grid, &params_for(&grid), Band::new(1, 1), ResultMode::Delta).unwrap() {
            BandResult::Flipped(cells) => cells,
            other => panic!("expected flipped cells, got {:?}", other),
        };
        assert!(flipped.iter().all(|c| c.y == 1));
    }

    #[test]
    fn test_evolve_rejects_bad_input() {
        let grid = Grid::new(4, 4);
        let params = params_for(&grid);

        assert!(matches!(
            evolve(&grid, &params, Band::new(3, 1), ResultMode::Delta),
            Err(GolError::InvalidBand { .. })
        ));
        assert!(matches!(
            evolve(&grid, &params, Band::new(0, 4), ResultMode::Delta),
            Err(GolError::InvalidBand { .. })
        ));

        let wrong = Params { image_width: 5, ..params };
        assert!(matches!(
            evolve(&grid, &wrong, Band::new(0, 3), ResultMode::Delta),
            Err(GolError::Protocol { .. })
        ));
    }

    #[test]
    fn test_check_band() {
        assert!(check_band(None, 4).is_err());
        assert!(check_band(Some(Band::new(0, 3)), 4).is_ok());
    }
}
