//! Reconstruction weighting: turn accumulated sums into averages with a
//! figure of merit.

use ndarray::parallel::par_azip;
use tracing::debug;

use crate::grid::{ComplexGrid, Coverage, WEIGHT_FLOOR};

/// Effective sample count below which no figure of merit is estimated
const MIN_EFFECTIVE_WEIGHT: f32 = 1e-3;

/// Divide the accumulated amplitudes by their weights and replace the
/// accumulated power by a figure of merit.
///
/// For a voxel with weights `w_i` and samples `s_i`, the weighted average is
/// `c = Σ w_i s_i / Σ w_i`. The spread of the samples about `c` gives the noise
/// power `(Σ w_i |s_i|² - W |c|²) / (W² - Σ w_i²)` (with `W = Σ w_i`), and
/// the figure of merit is the signal-to-noise ratio `|c|² / noise - 1`,
/// clamped at zero. Voxels with too few effective samples get a zero figure
/// of merit; voxels with no weight keep their (zero) amplitude.
///
/// Weighing is performed once, after all projections have been packed.
/// `weight2` is overwritten by the effective sample denominator
/// `W² - Σ w_i²`.
pub fn weigh(grid: &mut ComplexGrid) -> Coverage {
    let ComplexGrid { complex, weight, weight2, fom, .. } = grid;
    par_azip!((c in complex, &w in &*weight, w2 in weight2, f in fom) {
        if w > WEIGHT_FLOOR {
            *c /= w;
            *w2 = w * w - *w2;
            *f = if *w2 > MIN_EFFECTIVE_WEIGHT {
                let power = c.norm_sqr();
                let noise = (*f - w * power) / *w2;
                if noise > f32::EPSILON { (power / noise - 1.0).max(0.0) }
                else                    { 0.0 }
            } else {
                0.0
            };
        } else {
            *f = 0.0;
        }
    });
    let coverage = grid.coverage();
    debug!("Reciprocal space coverage: {coverage}");
    coverage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Complex32, Vector3};
    use float_eq::assert_float_eq;

    fn grid(n: usize) -> ComplexGrid { ComplexGrid::new([n, 1, 1], Vector3::new(1.0, 1.0, 1.0)) }

    #[test]
    fn single_sample_gives_average_without_merit() {
        let mut g = grid(2);
        g.accumulate(0, 0.5, Complex32::new(2.0, -4.0));
        let coverage = weigh(&mut g);
        assert_eq!(coverage, Coverage { covered: 1, total: 2 });
        assert_float_eq!(g.complex[0].re,  2.0, abs <= 1e-6);
        assert_float_eq!(g.complex[0].im, -4.0, abs <= 1e-6);
        assert_eq!(g.fom[0], 0.0);
        // Untouched voxel
        assert_eq!(g.complex[1], Complex32::default());
        assert_eq!(g.fom[1], 0.0);
    }

    #[test]
    fn identical_samples_are_averaged_and_noise_free() {
        let mut g = grid(1);
        for _ in 0..4 { g.accumulate(0, 1.0, Complex32::new(1.0, 1.0)) }
        weigh(&mut g);
        assert_float_eq!(g.complex[0].re, 1.0, abs <= 1e-6);
        assert_float_eq!(g.complex[0].im, 1.0, abs <= 1e-6);
        // No spread: noise estimate vanishes, so no figure of merit
        assert_eq!(g.fom[0], 0.0);
        assert_float_eq!(g.weight2[0], 12.0, abs <= 1e-5);
    }

    #[test]
    fn spread_samples_give_signal_to_noise_ratio() {
        // Samples 3 and 1: average 2, power 4;
        // noise = (Σ|s|² - W |c|²) / (W² - Σw²) = (10 - 8) / 2 = 1
        let mut g = grid(1);
        g.accumulate(0, 1.0, Complex32::new(3.0, 0.0));
        g.accumulate(0, 1.0, Complex32::new(1.0, 0.0));
        weigh(&mut g);
        assert_float_eq!(g.complex[0].re, 2.0, abs <= 1e-6);
        assert_float_eq!(g.fom[0], 3.0, abs <= 1e-5);
    }

    #[test]
    fn noise_dominated_voxel_has_zero_merit() {
        // Opposite samples average to zero: the ratio would be negative
        let mut g = grid(1);
        g.accumulate(0, 1.0, Complex32::new( 1.0, 0.0));
        g.accumulate(0, 1.0, Complex32::new(-1.0, 0.0));
        weigh(&mut g);
        assert_eq!(g.fom[0], 0.0);
    }

    #[test]
    fn weight_below_floor_is_left_alone() {
        let mut g = grid(1);
        g.accumulate(0, WEIGHT_FLOOR / 2.0, Complex32::new(1.0, 0.0));
        let before = g.complex[0];
        let coverage = weigh(&mut g);
        assert_eq!(coverage.covered, 0);
        assert_eq!(g.complex[0], before);
        assert_eq!(g.fom[0], 0.0);
    }
}
