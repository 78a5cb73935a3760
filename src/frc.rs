//! Fourier ring/shell correlation curves and the resolution read off them.

use std::ops::AddAssign;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::grid::ComplexGrid;
use crate::{Complex32, Error, Lengthf64, Result};

/// Sums below this are treated as zero
const TINY: f64 = 1e-30;

/// Correlations exceeding 1 by more than this are reported before clamping
const OVERSHOOT_TOLERANCE: f64 = 1e-4;

/// Statistic computed in each shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellMetric {
    /// Leave-one-out ratio: how well the test image is predicted by the
    /// reconstruction without it, relative to the reconstruction with it,
    /// corrected for the power lost by leaving it out
    #[default]
    Nloo,
    /// Normalized cross-correlation between the full and the leave-one-out
    /// reconstructions
    Fsc,
}

impl ShellMetric {
    fn correlation(self, s: &ShellSums) -> f64 {
        match self {
            ShellMetric::Nloo => {
                if s.sum_i_r < TINY || s.sum_r2_2 < TINY { 0.0 }
                else { (s.sum_i_r2 / s.sum_i_r) * (s.sum_r2 / s.sum_r2_2).sqrt() }
            }
            ShellMetric::Fsc => {
                let denominator = (s.sum_r2 * s.sum_r2_2).sqrt();
                if denominator < TINY { 0.0 }
                else { s.sum_r_r2 / denominator }
            }
        }
    }
}

impl std::str::FromStr for ShellMetric {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nloo" => Ok(ShellMetric::Nloo),
            "fsc"  => Ok(ShellMetric::Fsc),
            _ => Err(format!("unknown shell metric `{s}`: use nloo or fsc")),
        }
    }
}

impl std::fmt::Display for ShellMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self { ShellMetric::Nloo => "NLOO", ShellMetric::Fsc => "FSC" })
    }
}

/// Raw sums accumulated in one shell: `i` is the test image, `r` the full
/// reconstruction and `r2` the leave-one-out reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShellSums {
    /// (Fractional) number of samples
    pub n       : f64,
    pub sum_i2  : f64,
    pub sum_r2  : f64,
    pub sum_r2_2: f64,
    pub sum_i_r : f64,
    pub sum_i_r2: f64,
    pub sum_r_r2: f64,
}

impl ShellSums {
    /// Add the contributions of one voxel with weight `f`
    fn add(&mut self, f: f64, i: Complex32, r: Complex32, r2: Complex32) {
        let dot = |a: Complex32, b: Complex32| (a.re * b.re + a.im * b.im) as f64;
        self.n        += f;
        self.sum_i2   += f * i .norm_sqr() as f64;
        self.sum_r2   += f * r .norm_sqr() as f64;
        self.sum_r2_2 += f * r2.norm_sqr() as f64;
        self.sum_i_r  += f * dot(i, r );
        self.sum_i_r2 += f * dot(i, r2);
        self.sum_r_r2 += f * dot(r, r2);
    }
}

impl AddAssign for ShellSums {
    fn add_assign(&mut self, other: Self) {
        self.n        += other.n;
        self.sum_i2   += other.sum_i2;
        self.sum_r2   += other.sum_r2;
        self.sum_r2_2 += other.sum_r2_2;
        self.sum_i_r  += other.sum_i_r;
        self.sum_i_r2 += other.sum_i_r2;
        self.sum_r_r2 += other.sum_r_r2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shell {
    /// Spatial frequency in 1/Å
    pub s: f64,
    /// Correlation, within [0, 1]
    pub value: f64,
    pub sums: ShellSums,
}

/// Correlation as a function of spatial frequency
#[derive(Debug, Clone, PartialEq)]
pub struct FrcCurve {
    /// Shell `i` lies at spatial frequency `i / rad_scale`
    pub rad_scale: f64,
    /// Finest resolution considered
    pub hi_res: Lengthf64,
    pub metric: ShellMetric,
    /// Shells 1, 2, ... in order of increasing frequency
    pub shells: Vec<Shell>,
}

impl FrcCurve {

    /// Correlate the transform of a test image with the full and
    /// leave-one-out reconstructions of its central section.
    ///
    /// All three must have the same dimensions; the voxel size is taken from
    /// `full`. Shells are one reciprocal pixel of the largest real-space
    /// dimension wide, unless `sampling_ratio` asks for coarser shells.
    /// Each voxel is shared linearly between the two shells bracketing its
    /// radius.
    pub fn between(
        test          : &[Complex32],
        full          : &ComplexGrid,
        loo           : &ComplexGrid,
        hi_res        : Lengthf64,
        sampling_ratio: f64,
        metric        : ShellMetric,
    ) -> Result<Self> {
        if full.dims() != loo.dims() {
            return Err(Error::SizeMismatch { what: "leave-one-out grids", expected: full.dims(), got: loo.dims() })
        }
        if test.len() != full.len() {
            let [nx, ny, nz] = full.dims();
            return Err(Error::SizeMismatch { what: "test image transform", expected: [nx, ny, nz], got: [test.len(), 1, 1] })
        }

        let [nx, ny, nz] = full.dims();
        let sampling = full.sampling();
        let realsize = [nx as f64 * sampling.x, ny as f64 * sampling.y, nz as f64 * sampling.z];
        let rad_scale_max = realsize[0] / sampling_ratio.max(1.0);
        let rad_scale = realsize.iter().cloned().fold(0.0, f64::max).min(rad_scale_max);
        let maxrad = (rad_scale / hi_res).max(0.0) as usize;

        let empty = || vec![ShellSums::default(); maxrad];
        let sums = (0..full.len())
            .into_par_iter()
            .fold(empty, |mut sums, i| {
                let [h, k, l] = full.frequency_of(i);
                let (rx, ry, rz) = (h as f64 / realsize[0], k as f64 / realsize[1], l as f64 / realsize[2]);
                let radius = rad_scale * (rx * rx + ry * ry + rz * rz).sqrt();
                let ir = radius as usize;
                if ir + 1 < maxrad {
                    let f = radius - ir as f64;
                    sums[ir    ].add(1.0 - f, test[i], full.complex[i], loo.complex[i]);
                    sums[ir + 1].add(      f, test[i], full.complex[i], loo.complex[i]);
                }
                sums
            })
            .reduce(empty, |mut a, b| {
                a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
                a
            });

        let shells = sums.into_iter()
            .enumerate()
            .skip(1)
            .map(|(i, sums)| Shell { s: i as f64 / rad_scale, value: 0.0, sums })
            .collect();
        let mut curve = Self { rad_scale, hi_res, metric, shells };
        curve.recompute();
        Ok(curve)
    }

    /// Curve from `(s, value)` pairs, without underlying sums
    pub fn from_points(points: &[(f64, f64)], hi_res: Lengthf64) -> Self {
        let rad_scale = match points.first() {
            Some(&(s, _)) if s > 0.0 => 1.0 / s,
            _                         => 0.0,
        };
        let shells = points.iter()
            .map(|&(s, value)| Shell { s, value, sums: ShellSums::default() })
            .collect();
        Self { rad_scale, hi_res, metric: ShellMetric::default(), shells }
    }

    /// `(s, value)` pairs in order of increasing frequency
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.shells.iter().map(|shell| (shell.s, shell.value)).collect()
    }

    /// Add the shell sums of `other` to those of `self` and recompute the
    /// correlations from the combined sums.
    pub fn merge(&mut self, other: &FrcCurve) -> Result<()> {
        if self.shells.len() != other.shells.len() {
            return Err(Error::SizeMismatch { what: "correlation curve shells",
                                             expected: [self.shells.len(), 1, 1],
                                             got:      [other.shells.len(), 1, 1] })
        }
        for (mine, theirs) in self.shells.iter_mut().zip(&other.shells) {
            mine.sums += theirs.sums;
        }
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        let metric = self.metric;
        for shell in &mut self.shells {
            let value = metric.correlation(&shell.sums);
            shell.value = if value > 1.0 {
                if value > 1.0 + OVERSHOOT_TOLERANCE {
                    warn!("Correlation {value:.4} above 1 at {:.1} Å: clamped to 1", 1.0 / shell.s);
                }
                1.0
            } else {
                value.max(0.0)
            };
        }
    }

    /// Resolution (in Å) at which the curve crosses `cutoff`.
    ///
    /// The resolution is that of the last shell above the cutoff, refined by
    /// linear interpolation between the shells bracketing a downward crossing.
    /// A step from a saturated shell (1) to an empty one (0) is not
    /// interpolated. If the curve never exceeds the cutoff the coarsest shell
    /// is reported; with fewer than two shells, the high-resolution limit.
    pub fn resolution(&self, cutoff: f64) -> Lengthf64 {
        if self.shells.len() < 2 { return self.hi_res }
        let mut resolution = 1.0 / self.shells[0].s;
        let (mut vp, mut sp) = (1.0, 0.0);
        for &Shell { s, value: v, .. } in &self.shells {
            if v > cutoff { resolution = 1.0 / s }
            if vp > cutoff && v <= cutoff && sp > 0.0 {
                resolution = if vp >= 1.0 && v <= 0.0 {
                    1.0 / sp
                } else {
                    let f = (vp - cutoff) / (vp - v);
                    (1.0 - f) / sp + f / s
                };
            }
            vp = v;
            sp = s;
        }
        resolution
    }
}
