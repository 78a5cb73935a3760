//! Three-dimensional reciprocal-space accumulator.
//!
//! Frequencies are stored in the usual FFT order: the zero frequency sits at
//! index 0 of every axis and negative frequencies wrap around to the upper
//! half (see [`crate::index::frequency`]).
//!
//! A grid may cover only a slab of z-planes of a deeper volume. Coordinates
//! passed to [`ComplexGrid::voxel`] are always those of the full volume; the
//! grid decides whether they fall inside its slab.

use std::f64::consts::TAU;
use std::fmt;
use std::ops::Range;

use rayon::prelude::*;

use crate::index::{frequency, index3_to_1, wrap};
use crate::{BoxDim_u, Complex32, Error, Result, Vector3, Weightf32};

/// Voxels whose accumulated weight does not exceed this are unreconstructed
pub const WEIGHT_FLOOR: Weightf32 = 1e-6;

#[derive(Clone, Debug)]
pub struct ComplexGrid {
    /// Dimensions of the arrays held by this grid
    dims: BoxDim_u,
    /// Number of z-planes in the full volume
    depth: usize,
    /// First z-plane of the full volume held by this grid
    z_start: usize,
    /// Voxel size in Å
    sampling: Vector3,

    pub complex: Vec<Complex32>,
    pub weight : Vec<Weightf32>,
    pub weight2: Vec<Weightf32>,
    pub fom    : Vec<f32>,
}

impl ComplexGrid {

    /// Empty grid covering the whole of a volume
    pub fn new(dims: BoxDim_u, sampling: Vector3) -> Self {
        let n = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            depth: dims[2],
            z_start: 0,
            sampling,
            complex: vec![Complex32::default(); n],
            weight : vec![0.0; n],
            weight2: vec![0.0; n],
            fom    : vec![0.0; n],
        }
    }

    /// Empty grid covering planes `z` of a volume with dimensions `dims`
    pub fn slab(dims: BoxDim_u, z: Range<usize>, sampling: Vector3) -> Result<Self> {
        let depth = dims[2];
        if z.start >= z.end || z.end > depth {
            return Err(Error::SlabOutsideVolume { start: z.start, end: z.end, depth })
        }
        let mut grid = Self::new([dims[0], dims[1], z.len()], sampling);
        grid.depth   = depth;
        grid.z_start = z.start;
        Ok(grid)
    }

    /// Dimensions of the data held by this grid
    pub fn dims(&self) -> BoxDim_u { self.dims }

    /// Dimensions of the full volume of which this grid may be a slab
    pub fn volume_dims(&self) -> BoxDim_u { [self.dims[0], self.dims[1], self.depth] }

    pub fn z_range(&self) -> Range<usize> { self.z_start..self.z_start + self.dims[2] }

    pub fn sampling(&self) -> Vector3 { self.sampling }

    pub fn len(&self) -> usize { self.complex.len() }

    pub fn is_empty(&self) -> bool { self.complex.is_empty() }

    /// Flat index of the voxel at (possibly negative or out of range)
    /// volume coordinates `[x, y, z]`, after wrapping them into the volume.
    /// `None` if the voxel lies outside this grid's slab.
    #[inline]
    pub fn voxel(&self, [x, y, z]: [i64; 3]) -> Option<usize> {
        let [nx, ny, nz] = self.dims;
        let z = wrap(z, self.depth);
        if z < self.z_start || z >= self.z_start + nz { return None }
        Some(index3_to_1([wrap(x, nx), wrap(y, ny), z - self.z_start], self.dims))
    }

    /// Signed frequency indices `[h, k, l]` of the voxel at flat index `i`,
    /// relative to the full volume.
    #[inline]
    pub fn frequency_of(&self, i: usize) -> [i64; 3] {
        let [nx, ny, _] = self.dims;
        let x = i % nx;
        let y = (i / nx) % ny;
        let z = i / (nx * ny) + self.z_start;
        [frequency(x, nx), frequency(y, ny), frequency(z, self.depth)]
    }

    /// Add one weighted sample to voxel `i`
    #[inline]
    pub fn accumulate(&mut self, i: usize, w: Weightf32, sample: Complex32) {
        self.complex[i] += sample * w;
        self.weight [i] += w;
        self.weight2[i] += w * w;
        self.fom    [i] += w * sample.norm_sqr();
    }

    /// How many voxels have received a non-negligible weight
    pub fn coverage(&self) -> Coverage {
        let covered = self.weight.par_iter().filter(|&&w| w > WEIGHT_FLOOR).count();
        Coverage { covered, total: self.len() }
    }

    /// Multiply every voxel by the phase which moves the real-space origin
    /// from the corner of the volume to its centre.
    ///
    /// Slabs use their frequencies within the full volume, so that slabs
    /// processed separately agree with a single pass over the whole volume.
    pub fn phase_shift_to_centre(&mut self) {
        let [nx, ny, _] = self.dims;
        // Centre of each axis as a fraction of its length
        let [cx, cy, cz] = self.volume_dims().map(|n| (n / 2) as f64 / n as f64);
        let (z_start, depth) = (self.z_start, self.depth);
        self.complex
            .par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(z, slice)| {
                let phase_z = frequency(z + z_start, depth) as f64 * cz;
                for y in 0..ny {
                    let phase_yz = phase_z + frequency(y, ny) as f64 * cy;
                    for x in 0..nx {
                        let phase = -TAU * (frequency(x, nx) as f64 * cx + phase_yz);
                        slice[x + y * nx] *= Complex32::new(phase.cos() as f32, phase.sin() as f32);
                    }
                }
            });
    }
}

/// Fraction of reciprocal-space voxels which received at least one sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coverage {
    pub covered: usize,
    pub total: usize,
}

impl Coverage {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 { 0.0 }
        else               { self.covered as f64 / self.total as f64 }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} voxels ({:.2} %)", self.covered, self.total, 100.0 * self.fraction())
    }
}
