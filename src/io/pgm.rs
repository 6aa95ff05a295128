//! Binary PGM (P5) images
//!
//! Inputs are read from `{input_dir}/{W}x{H}.pgm`, outputs are written to
//! `{output_dir}/{W}x{H}x{turn}.pgm`. Only 8-bit images are supported; a
//! pixel of 255 is alive and anything else is dead.

use super::{PixelSink, PixelSource};
use crate::world::{Grid, Params, ALIVE, DEAD};
use crate::Result;
use anyhow::{bail, Context};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// PGM files in an input and an output directory
#[derive(Debug, Clone)]
pub struct PgmImages {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl PgmImages {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn input_path(&self, name: &str) -> PathBuf {
        self.input_dir.join(format!("{}.pgm", name))
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.pgm", name))
    }
}

impl PixelSource for PgmImages {
    fn read_grid(&mut self, params: &Params) -> Result<Grid> {
        let path = self.input_path(&params.image_name());
        let grid = read_pgm(&path)?;
        params
            .check_grid(&grid)
            .with_context(|| format!("Input image {} does not match parameters", path.display()))?;
        Ok(grid)
    }
}

impl PixelSink for PgmImages {
    fn write_grid(&mut self, name: &str, grid: &Grid) -> Result<()> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory {}", self.output_dir.display())
        })?;
        write_pgm(&self.output_path(name), grid)
    }
}

/// Read a P5 image from `path`
pub fn read_pgm(path: &Path) -> Result<Grid> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let grid = decode(&bytes).with_context(|| format!("Invalid PGM image {}", path.display()))?;
    debug!(path = %path.display(), width = grid.width(), height = grid.height(), "image read");
    Ok(grid)
}

/// Write `grid` to `path` as a P5 image
pub fn write_pgm(path: &Path, grid: &Grid) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(&encode(grid))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "image written");
    Ok(())
}

pub fn encode(grid: &Grid) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", grid.width(), grid.height());
    let mut out = Vec::with_capacity(header.len() + grid.as_bytes().len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(grid.as_bytes());
    out
}

pub fn decode(bytes: &[u8]) -> Result<Grid> {
    let mut header = Header { bytes, pos: 0 };

    let magic = header.token()?;
    if magic != b"P5" {
        bail!("unsupported magic {:?}, expected P5", String::from_utf8_lossy(magic));
    }
    let width = header.number("width")?;
    let height = header.number("height")?;
    let maxval = header.number("maxval")?;
    if maxval == 0 || maxval > 255 {
        bail!("unsupported maxval {}", maxval);
    }

    // Exactly one whitespace byte separates the header from the raster
    let start = header.pos + 1;
    let Some(size) = width.checked_mul(height) else {
        bail!("image dimensions {}x{} are too large", width, height);
    };
    let Some(end) = start.checked_add(size) else {
        bail!("image dimensions {}x{} are too large", width, height);
    };
    if bytes.len() < end {
        bail!(
            "raster holds {} bytes, expected {}",
            bytes.len().saturating_sub(start),
            size
        );
    }

    let cells = bytes[start..end]
        .iter()
        .map(|&p| if p == ALIVE { ALIVE } else { DEAD })
        .collect();
    Ok(Grid::from_cells(width, height, cells)?)
}

struct Header<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Header<'a> {
    /// Next whitespace-delimited token, skipping `#` comments
    fn token(&mut self) -> Result<&'a [u8]> {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos < self.bytes.len() && self.bytes[self.pos] == b'#' {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }

        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if start == self.pos {
            bail!("truncated header");
        }
        Ok(&self.bytes[start..self.pos])
    }

    fn number(&mut self, field: &str) -> Result<usize> {
        let token = self.token()?;
        std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse().ok())
            .with_context(|| format!("invalid {} {:?}", field, String::from_utf8_lossy(token)))
    }
}
