//! Backtransformation of reciprocal-space volumes too large for memory.
//!
//! A volume is transformed in two passes. Each z-slab, while still in
//! memory, gets a 2D backward transform of every z-slice and is appended to a
//! [`RawBlock`] on disk. The block then gets a 1D backward transform along
//! every z-line, one xz-plane (fixed y) at a time. Planes occupy disjoint
//! byte ranges of the file, so they are processed in parallel, each worker
//! with its own file handle.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::ArrayViewMut2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::ResourceContext;
use crate::fft::{transform_slices, FftDirection, LineTransform};
use crate::grid::ComplexGrid;
use crate::io::raw::{self, RawBlock};
use crate::{Complex32, Error, Result};

/// 2D backward transform of every z-slice of `grid`
pub fn backtransform_slices(grid: &mut ComplexGrid) {
    let dims = grid.dims();
    transform_slices(&mut grid.complex, dims, FftDirection::Inverse);
}

/// Running statistics of real values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockStatistics {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum2: f64,
    pub count: usize,
}

impl Default for BlockStatistics {
    fn default() -> Self {
        Self { min: f64::INFINITY, max: f64::NEG_INFINITY, sum: 0.0, sum2: 0.0, count: 0 }
    }
}

impl BlockStatistics {

    pub fn add(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum  += v;
        self.sum2 += v * v;
        self.count += 1;
    }

    pub fn combine(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            sum2: self.sum2 + other.sum2,
            count: self.count + other.count,
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    pub fn std(&self) -> f64 {
        if self.count == 0 { return 0.0 }
        let avg = self.avg();
        (self.sum2 / self.count as f64 - avg * avg).max(0.0).sqrt()
    }
}

impl FromIterator<f64> for BlockStatistics {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::default();
        iter.into_iter().for_each(|v| stats.add(v));
        stats
    }
}

/// Private I/O state and buffers of one worker transforming xz-planes
struct PlaneWorker {
    file: File,
    z: LineTransform,
    plane: Vec<Complex32>,
    bytes: Vec<u8>,
}

impl PlaneWorker {

    fn open(path: &Path, [nx, nz]: [usize; 2]) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).at(path)?;
        Ok(Self {
            file,
            z: LineTransform::new(nz, FftDirection::Inverse),
            plane: vec![Complex32::default(); nx * nz],
            bytes: vec![],
        })
    }

    /// Transform xz-plane `y` of a block with dimensions `[nx, ny, nz]` in place
    fn process(&mut self, path: &Path, [nx, ny, nz]: [usize; 3], y: usize, stats: &mut BlockStatistics) -> Result<()> {
        let offset = |z: usize| ((z * ny + y) * nx) as u64;
        for (z, row) in self.plane.chunks_mut(nx).enumerate() {
            raw::read_at(&mut self.file, offset(z), row, &mut self.bytes).at(path)?;
        }
        let len = self.plane.len();
        let plane = ArrayViewMut2::from_shape((nz, nx), &mut self.plane[..])
            .map_err(|_| Error::SizeMismatch { what: "xz-plane", expected: [nx, 1, nz], got: [len, 1, 1] })?;
        self.z.process_columns(plane);
        for (z, row) in self.plane.chunks(nx).enumerate() {
            raw::write_at(&mut self.file, offset(z), row, &mut self.bytes).at(path)?;
            row.iter().for_each(|v| stats.add(v.re as f64));
        }
        Ok(())
    }
}

/// 1D backward transform along z of every line of the block, in place on
/// disk, returning statistics of the real parts of the result.
pub fn backtransform_z_on_disk(block: &RawBlock) -> Result<BlockStatistics> {
    let dims @ [nx, ny, nz] = block.dims();
    let path = block.path();
    if nx * ny * nz == 0 { return Ok(BlockStatistics::default()) }
    debug!("Backtransforming {} along z, {ny} planes of {nx} x {nz}", path.display());

    let stats = (0..ny)
        .into_par_iter()
        .fold(|| PlaneWorker::open(path, [nx, nz]).map(|worker| (worker, BlockStatistics::default())),
              |state, y| {
                  let (mut worker, mut stats) = state?;
                  worker.process(path, dims, y, &mut stats)?;
                  Ok((worker, stats))
              })
        .map(|state| state.map(|(_, stats)| stats))
        .try_reduce(BlockStatistics::default, |a, b| Ok(a.combine(b)))?;

    info!("Backtransformed volume: min {:.4}, max {:.4}, avg {:.4}, std {:.4}",
          stats.min, stats.max, stats.avg(), stats.std());
    Ok(stats)
}

/// Element type of a real-space volume written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType { U8, I8, U16, I16, I32, #[default] F32, F64 }

impl DataType {

    /// Smallest and largest representable values
    pub fn range(self) -> (f64, f64) {
        use DataType::*;
        match self {
            U8  => (u8 ::MIN as f64, u8 ::MAX as f64),
            I8  => (i8 ::MIN as f64, i8 ::MAX as f64),
            U16 => (u16::MIN as f64, u16::MAX as f64),
            I16 => (i16::MIN as f64, i16::MAX as f64),
            I32 => (i32::MIN as f64, i32::MAX as f64),
            F32 => (f32::MIN as f64, f32::MAX as f64),
            F64 => (f64::MIN, f64::MAX),
        }
    }

    pub fn size(self) -> usize {
        use DataType::*;
        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            I32 | F32 => 4,
            F64 => 8,
        }
    }

    fn encode(self, v: f64, out: &mut Vec<u8>) {
        use DataType::*;
        match self {
            U8  => out.push(v.round() as u8),
            I8  => out.extend_from_slice(&(v.round() as i8 ).to_le_bytes()),
            U16 => out.extend_from_slice(&(v.round() as u16).to_le_bytes()),
            I16 => out.extend_from_slice(&(v.round() as i16).to_le_bytes()),
            I32 => out.extend_from_slice(&(v.round() as i32).to_le_bytes()),
            F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            F64 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use DataType::*;
        match s.to_lowercase().as_str() {
            "u8"  | "uchar"  => Ok(U8),
            "i8"  | "char"   => Ok(I8),
            "u16" | "ushort" => Ok(U16),
            "i16" | "short"  => Ok(I16),
            "i32" | "int"    => Ok(I32),
            "f32" | "float"  => Ok(F32),
            "f64" | "double" => Ok(F64),
            _ => Err(format!("unknown data type `{s}`")),
        }
    }
}

/// How the real parts of a complex block are converted for writing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WriteOptions {
    pub data_type: DataType,
    /// Target average and standard deviation
    pub rescale: Option<(f64, f64)>,
    /// Truncation limits, after rescaling
    pub cut: Option<(f64, f64)>,
}

/// Linear map `v * scale + shift` followed by truncation to `cut`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub scale: f64,
    pub shift: f64,
    pub cut: (f64, f64),
}

impl Conversion {

    /// By default, integer types are filled from their minimum (or zero) over
    /// the range of the data; floating point data are unchanged. Rescaling to
    /// a target average and standard deviation overrides this. Values are
    /// truncated to `options.cut` if given (else to the converted data range),
    /// and always to the range of the data type.
    pub fn new(stats: &BlockStatistics, options: &WriteOptions) -> Self {
        use DataType::*;
        let range = stats.max - stats.min;
        let fill = |full: f64| if range > f64::EPSILON { full / range } else { 1.0 };
        let (mut scale, mut shift) = match options.data_type {
            U8  => { let s = fill(255.0);           (s, -stats.min * s) }
            I8  => { let s = fill(255.0);           (s, -128.0 - stats.min * s) }
            U16 => { let s = fill(u16::MAX as f64); (s, -stats.min * s) }
            I16 => (fill(i16::MAX as f64), 0.0),
            I32 => (fill(2e9), 0.0),
            F32 | F64 => (1.0, 0.0),
        };
        if let Some((avg, std)) = options.rescale {
            let data_std = stats.std();
            if data_std > 0.0 {
                scale = std / data_std;
                shift = avg - stats.avg() * scale;
            }
        }
        let (cutmin, cutmax) = match options.cut {
            Some((lo, hi)) if lo < hi => (lo, hi),
            _ => (stats.min * scale + shift, stats.max * scale + shift),
        };
        let (tmin, tmax) = options.data_type.range();
        Self { scale, shift, cut: (cutmin.max(tmin), cutmax.min(tmax)) }
    }

    pub fn apply(&self, v: f64) -> f64 {
        (v * self.scale + self.shift).clamp(self.cut.0, self.cut.1)
    }
}

/// Write the real parts of `block` as a headerless raw volume at `out`, plane
/// by plane, converted according to `options`.
pub fn write_real_block(block: &RawBlock, stats: &BlockStatistics, out: &Path, options: &WriteOptions) -> Result<Conversion> {
    let [nx, ny, nz] = block.dims();
    let conversion = Conversion::new(stats, options);
    debug!("Writing {} as {:?}: {conversion:?}", out.display(), options.data_type);
    let path = block.path();
    let mut input = File::open(path).at(path)?;
    let mut output = BufWriter::new(File::create(out).at(out)?);
    let mut plane = vec![Complex32::default(); nx * ny];
    let mut bytes = vec![];
    let mut encoded = Vec::with_capacity(nx * ny * options.data_type.size());
    for z in 0..nz {
        raw::read_at(&mut input, (z * nx * ny) as u64, &mut plane, &mut bytes).at(path)?;
        encoded.clear();
        for v in &plane {
            options.data_type.encode(conversion.apply(v.re as f64), &mut encoded);
        }
        output.write_all(&encoded).at(out)?;
    }
    output.flush().at(out)?;
    Ok(conversion)
}
