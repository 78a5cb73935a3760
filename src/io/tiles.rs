//! Index of the tiles into which a large volume is cut for reassembly by
//! downstream tools.
//!
//! Text format: the first line holds the dimensions of the whole volume, each
//! following line the start of one tile, all as three integers `x y z`.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use crate::error::ResourceContext;
use crate::{BoxDim_u, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIndex {
    pub dims: BoxDim_u,
    pub starts: Vec<[usize; 3]>,
}

impl TileIndex {

    /// Tiles spanning the whole of x and z, `ysize` planes thick in y and
    /// aligned so that one of them starts at `ystart`. The first tile always
    /// starts at the origin.
    pub fn y_tiles(dims: BoxDim_u, ystart: usize, ysize: usize) -> Self {
        let ysize = ysize.max(1);
        let starts = std::iter::once(0)
            .chain((ystart % ysize..dims[1]).step_by(ysize).filter(|&y| y != 0))
            .map(|y| [0, y, 0])
            .collect();
        Self { dims, starts }
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for [x, y, z] in std::iter::once(&self.dims).chain(&self.starts) {
            // Writing to a String cannot fail
            let _ = writeln!(text, "{x} {y} {z}");
        }
        text
    }

    pub fn from_text(text: &str) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);
        let mut lines = text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(n, line)| {
                let numbers = line.split_whitespace()
                    .map(str::parse::<usize>)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| invalid(format!("line {}: {e}", n + 1)))?;
                <[usize; 3]>::try_from(numbers)
                    .map_err(|v| invalid(format!("line {}: expected 3 integers, found {}", n + 1, v.len())))
            });
        let dims = lines.next().ok_or_else(|| invalid("empty tile index".into()))??;
        let starts = lines.collect::<io::Result<Vec<_>>>()?;
        Ok(Self { dims, starts })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text()).at(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).at(path)?;
        Self::from_text(&text).at(path)
    }
}

/// Cut planes `ystart..ystart + ysize` (clamped to the volume) out of a real
/// volume with dimensions `dims`, returning the tile and its dimensions.
pub fn extract_y_tile<T: Copy>(volume: &[T], dims: BoxDim_u, ystart: usize, ysize: usize) -> Result<(Vec<T>, BoxDim_u)> {
    let [nx, ny, nz] = dims;
    if volume.len() != nx * ny * nz {
        return Err(Error::SizeMismatch { what: "volume for tiling", expected: dims, got: [volume.len(), 1, 1] })
    }
    if ystart >= ny {
        return Err(Error::SlabOutsideVolume { start: ystart, end: ystart + ysize, depth: ny })
    }
    let ysize = ysize.min(ny - ystart);
    let tile = volume
        .chunks(nx * ny)
        .flat_map(|plane| &plane[ystart * nx..(ystart + ysize) * nx])
        .copied()
        .collect();
    Ok((tile, [nx, ysize, nz]))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn y_tiles_cover_volume() {
        let index = TileIndex::y_tiles([10, 25, 4], 0, 10);
        assert_eq!(index.starts, vec![[0, 0, 0], [0, 10, 0], [0, 20, 0]]);
        assert_eq!(index.to_text(), "10 25 4\n0 0 0\n0 10 0\n0 20 0\n");
    }

    #[test]
    fn y_tiles_aligned_on_start() {
        let index = TileIndex::y_tiles([10, 25, 4], 13, 10);
        assert_eq!(index.starts, vec![[0, 0, 0], [0, 3, 0], [0, 13, 0], [0, 23, 0]]);
    }

    #[test]
    fn text_is_read_back() {
        let index = TileIndex::y_tiles([64, 100, 32], 20, 40);
        assert_eq!(TileIndex::from_text(&index.to_text()).unwrap(), index);
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(TileIndex::from_text("").is_err());
        assert!(TileIndex::from_text("1 2\n").is_err());
        assert!(TileIndex::from_text("1 2 3\n0 x 0\n").is_err());
    }

    #[test]
    fn index_file_on_disk() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("y.tiles");
        let index = TileIndex::y_tiles([8, 8, 8], 0, 3);
        index.write(&path)?;
        assert_eq!(TileIndex::read(&path)?, index);
        std::fs::write(&path, "garbage")?;
        assert!(matches!(TileIndex::read(&path), Err(Error::Resource { .. })));
        Ok(())
    }

    #[test]
    fn tile_holds_requested_rows() {
        // Value encodes its coordinates: 100 z + 10 y + x
        let dims = [3, 4, 2];
        let volume: Vec<u32> = (0..2).flat_map(|z| (0..4).flat_map(move |y| (0..3).map(move |x| 100 * z + 10 * y + x))).collect();
        let (tile, tdims) = extract_y_tile(&volume, dims, 1, 2).unwrap();
        assert_eq!(tdims, [3, 2, 2]);
        assert_eq!(tile, vec![10, 11, 12, 20, 21, 22, 110, 111, 112, 120, 121, 122]);
        // Clamped at the edge of the volume
        let (tile, tdims) = extract_y_tile(&volume, dims, 3, 5).unwrap();
        assert_eq!(tdims, [3, 1, 2]);
        assert_eq!(tile, vec![30, 31, 32, 130, 131, 132]);
        assert!(extract_y_tile(&volume, dims, 4, 1).is_err());
    }
}
