//! Packing of 2D projection transforms into 3D reciprocal space.
//!
//! By the projection-slice theorem, the transform of a projection is a
//! central section through the transform of the volume, oriented like the
//! micrograph. Every in-band sample `(h, k)` of the projection is mapped into
//! the volume by the transpose of the micrograph's orientation matrix, scaled
//! from transform pixels to volume voxels, and deposited on the neighbouring
//! voxels. Coordinates wrap around the grid, preserving the periodicity of
//! the discrete transform.

use serde::Deserialize;

use geometry::{scale_rows, split_floor, Volume};

use crate::grid::ComplexGrid;
use crate::projection::Projection;
use crate::{Complex32, Error, Lengthf64, Matrix3, Result, Vector3, Weightf32};

/// How a sample is shared among the voxels surrounding its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Full weight to the closest voxel
    NearestNeighbour,
    /// Weight `1 - distance` to the closest voxel
    WeightedNearest,
    /// Linear weights to the 8 surrounding voxels
    #[default]
    Trilinear,
}

impl std::str::FromStr for Interpolation {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use Interpolation::*;
        match s {
            "nearest"  | "nearest_neighbour" => Ok(NearestNeighbour),
            "weighted" | "weighted_nearest"  => Ok(WeightedNearest),
            "trilinear"                      => Ok(Trilinear),
            _ => Err(format!("unknown interpolation `{s}`: use nearest, weighted or trilinear")),
        }
    }
}

/// Smallest weight worth depositing with weighted nearest-neighbour packing
const MIN_WEIGHT: f64 = 1e-6;

/// Parameters for packing micrographs into a (slab of a) volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackParams {
    /// Finest resolution packed
    pub hi_res: Lengthf64,
    /// Coarsest resolution packed
    pub lo_res: Option<Lengthf64>,
    /// Volume voxels per micrograph pixel
    pub scale: f64,
    pub interpolation: Interpolation,
}

/// Pack `projection` into `grid`, returning the number of projection samples
/// which contributed to at least one voxel of the grid.
///
/// The mapping always refers to the full volume: when `grid` is a slab, samples
/// landing outside it are skipped, so packing every slab in turn touches the
/// same voxels as packing the whole volume at once.
pub fn pack_volume(grid: &mut ComplexGrid, projection: &Projection, params: &PackParams) -> usize {
    if projection.is_empty() { return 0 }

    let n = projection.size as f64;
    let [nx, ny, nz] = grid.volume_dims();
    let vscale = Vector3::new(nx as f64, ny as f64, nz as f64) / (params.scale * n);
    let mat = scale_rows(&projection.orientation.transpose(), &vscale);

    // Radii in transform pixels. The hi_res circle is inclusive, Nyquist is
    // not: +n/2 and -n/2 are the same sample.
    let nyquist = 0.5 * n;
    let max_rad = projection.pixel_size / params.hi_res * n;
    let min_rad = params.lo_res.map_or(0.0, |lo| projection.pixel_size / lo * n);
    let (max_rad_sq, min_rad_sq, nyquist_sq) = (max_rad * max_rad, min_rad * min_rad, nyquist * nyquist);
    let lim = max_rad.min(nyquist).floor() as i64;

    let mut packed = 0;
    for k in -lim..=lim {
        for h in -lim..=lim {
            let d2 = (h * h + k * k) as f64;
            if d2 > max_rad_sq || d2 >= nyquist_sq || d2 < min_rad_sq { continue }
            let m = mat * Vector3::new(h as f64, k as f64, 0.0);
            let sample = projection.sample(h, k);
            if deposit(grid, m, sample, params.interpolation) { packed += 1 }
        }
    }
    packed
}

/// Share `sample` at position `m` among the voxels around it. Returns whether
/// any voxel of `grid` received a contribution.
fn deposit(grid: &mut ComplexGrid, m: Vector3, sample: Complex32, interpolation: Interpolation) -> bool {
    use Interpolation::*;
    match interpolation {
        NearestNeighbour | WeightedNearest => {
            let c = m.map(f64::round);
            let w = match interpolation {
                WeightedNearest => 1.0 - (m - c).norm(),
                _               => 1.0,
            };
            if w <= MIN_WEIGHT { return false }
            match grid.voxel([c.x as i64, c.y as i64, c.z as i64]) {
                Some(j) => { grid.accumulate(j, w as Weightf32, sample); true }
                None    => false,
            }
        }
        Trilinear => {
            let ([ix, iy, iz], f) = split_floor(&m);
            let mut hit = false;
            for dz in 0..2 {
                let wz = if dz == 0 { 1.0 - f.z } else { f.z };
                for dy in 0..2 {
                    let wy = if dy == 0 { 1.0 - f.y } else { f.y };
                    for dx in 0..2 {
                        let wx = if dx == 0 { 1.0 - f.x } else { f.x };
                        let w = Vector3::new(wx, wy, wz).volume();
                        if w <= 0.0 { continue }
                        if let Some(j) = grid.voxel([ix + dx, iy + dy, iz + dz]) {
                            grid.accumulate(j, w as Weightf32, sample);
                            hit = true;
                        }
                    }
                }
            }
            hit
        }
    }
}

/// Parameters for packing central sections for the leave-one-out estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionParams {
    /// Finest resolution packed
    pub hi_res: Lengthf64,
    /// Thickness of the reconstruction in voxels, which sets the width of the
    /// band of reciprocal space around a central section to which a
    /// micrograph contributes
    pub zsize: usize,
}

/// Pack `projection` into the central section of the micrograph with
/// orientation `reference`.
///
/// `full` and `loo` are single-plane grids with the size of the transforms.
/// Samples are mapped into the frame of the reference micrograph and kept if
/// they lie within one voxel of its central plane, after scaling the
/// out-of-plane coordinate to the thickness of the reconstruction. They are
/// spread bilinearly in the plane. Every projection goes into `full`; all but
/// the reference micrograph itself (flagged `in_plane`) also go into `loo`.
pub fn pack_central_section(
    full      : &mut ComplexGrid,
    loo       : &mut ComplexGrid,
    projection: &Projection,
    reference : &Matrix3,
    params    : &SectionParams,
) -> Result<usize> {
    if projection.is_empty() { return Ok(0) }
    if full.dims() != loo.dims() {
        return Err(Error::SizeMismatch { what: "leave-one-out grids", expected: full.dims(), got: loo.dims() })
    }

    let n = projection.size as f64;
    let [nx, ny, _] = full.dims();
    let zsize = params.zsize.max(1) as f64;
    let vscale = Vector3::new(nx as f64, ny as f64, zsize) / n;
    let mat = scale_rows(&(reference * projection.orientation.transpose()), &vscale);
    let invsize = Vector3::new(1.0 / nx as f64, 1.0 / ny as f64, 1.0 / zsize);

    // In cycles per pixel, never beyond Nyquist
    let max_rad = (projection.pixel_size / params.hi_res).min(0.5);
    let max_rad_sq = max_rad * max_rad;
    let lim = (max_rad * n).floor() as i64;

    let mut packed = 0;
    for k in -lim..=lim {
        for h in -lim..=lim {
            let m = mat * Vector3::new(h as f64, k as f64, 0.0);
            if m.z.abs() > 1.0 { continue }
            if m.component_mul(&invsize).norm_squared() > max_rad_sq { continue }
            let sample = projection.sample(h, k);
            let ([ix, iy, _], f) = split_floor(&m);
            for dy in 0..2 {
                let wy = if dy == 0 { 1.0 - f.y } else { f.y };
                for dx in 0..2 {
                    let wx = if dx == 0 { 1.0 - f.x } else { f.x };
                    let w = Vector3::new(wx, wy, 1.0).volume() as Weightf32;
                    if let Some(j) = full.voxel([ix + dx, iy + dy, 0]) {
                        full.accumulate(j, w, sample);
                        if !projection.in_plane { loo.accumulate(j, w, sample) }
                    }
                }
            }
            packed += 1;
        }
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::WEIGHT_FLOOR;
    use crate::index::{frequency, index3_to_1};
    use float_eq::assert_float_eq;
    use geometry::tilt_matrix;
    use rstest::rstest;

    fn iso(s: f64) -> Vector3 { Vector3::new(s, s, s) }

    /// Square projection whose sample at `(h, k)` is `h + i k`, making it
    /// easy to check where each sample ended up.
    fn labelled_projection(n: usize, orientation: Matrix3) -> Projection {
        let mut p = Projection::empty(orientation, 1.0);
        p.size = n;
        p.data = (0..n * n)
            .map(|i| Complex32::new(frequency(i % n, n) as f32, frequency(i / n, n) as f32))
            .collect();
        p
    }

    fn params(interpolation: Interpolation) -> PackParams {
        PackParams { hi_res: 2.0, lo_res: None, scale: 1.0, interpolation }
    }

    #[rstest(/**/ interpolation,
             case(Interpolation::NearestNeighbour),
             case(Interpolation::WeightedNearest),
             case(Interpolation::Trilinear),
    )]
    fn untilted_projection_fills_central_plane(interpolation: Interpolation) {
        let n = 8;
        let mut grid = ComplexGrid::new([n, n, 4], iso(1.0));
        let p = labelled_projection(n, Matrix3::identity());
        let packed = pack_volume(&mut grid, &p, &params(interpolation));
        // All samples strictly inside the Nyquist circle of radius 4
        let expected = (-3..=3_i64).flat_map(|k| (-3..=3_i64).map(move |h| (h, k)))
                                   .filter(|(h, k)| h * h + k * k < 16)
                                   .count();
        assert_eq!(packed, expected);
        for i in 0..grid.len() {
            let [h, k, l] = grid.frequency_of(i);
            if grid.weight[i] > WEIGHT_FLOOR {
                assert_eq!(l, 0);
                let c = grid.complex[i] / grid.weight[i];
                assert_float_eq!(c.re, h as f32, abs <= 1e-5);
                assert_float_eq!(c.im, k as f32, abs <= 1e-5);
            }
        }
    }

    #[test]
    fn empty_projection_packs_nothing() {
        let mut grid = ComplexGrid::new([4, 4, 4], iso(1.0));
        let p = Projection::empty(Matrix3::identity(), 1.0);
        assert_eq!(pack_volume(&mut grid, &p, &params(Interpolation::Trilinear)), 0);
        assert!(grid.weight.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn resolution_band_limits_samples() {
        let n = 16;
        let p = labelled_projection(n, Matrix3::identity());
        let mut grid = ComplexGrid::new([n, n, 1], iso(1.0));
        // Radii (in transform pixels) between 16/8 = 2 and 16/4 = 4
        let band = PackParams { hi_res: 4.0, lo_res: Some(8.0), scale: 1.0, interpolation: Interpolation::NearestNeighbour };
        pack_volume(&mut grid, &p, &band);
        for i in 0..grid.len() {
            let [h, k, _] = grid.frequency_of(i);
            let r2 = h * h + k * k;
            let inside = (4..=16).contains(&r2);
            assert_eq!(grid.weight[i] > 0.0, inside, "h={h} k={k}");
        }
    }

    #[rstest(/**/ interpolation,
             case(Interpolation::NearestNeighbour),
             case(Interpolation::WeightedNearest),
             case(Interpolation::Trilinear),
    )]
    fn samples_on_the_resolution_limit_are_packed(interpolation: Interpolation) {
        let n = 16;
        let p = labelled_projection(n, Matrix3::identity());
        let mut grid = ComplexGrid::new([n, n, 1], iso(1.0));
        // Radius 16/4 = 4 transform pixels, well inside Nyquist
        let limit = PackParams { hi_res: 4.0, ..params(interpolation) };
        pack_volume(&mut grid, &p, &limit);
        for [h, k] in [[4, 0], [-4, 0], [0, 4], [0, -4]] {
            let j = grid.voxel([h, k, 0]).unwrap();
            assert!(grid.weight[j] > WEIGHT_FLOOR, "h={h} k={k}");
            let c = grid.complex[j] / grid.weight[j];
            assert_float_eq!(c.re, h as f32, abs <= 1e-5);
            assert_float_eq!(c.im, k as f32, abs <= 1e-5);
        }
        let beyond = grid.voxel([4, 1, 0]).unwrap();
        assert_eq!(grid.weight[beyond], 0.0);
    }

    #[test]
    fn central_section_stops_at_nyquist() {
        let n = 8;
        let (mut full, mut loo) = section_grids(n);
        let p = labelled_projection(n, Matrix3::identity());
        // Asking for twice the Nyquist frequency must not wrap round the transform
        let finer = SectionParams { hi_res: 1.0, zsize: 4 };
        let at_nyquist = SectionParams { hi_res: 2.0, zsize: 4 };
        let packed = pack_central_section(&mut full, &mut loo, &p, &Matrix3::identity(), &finer).unwrap();
        let (mut full2, mut loo2) = section_grids(n);
        let expected = pack_central_section(&mut full2, &mut loo2, &p, &Matrix3::identity(), &at_nyquist).unwrap();
        assert_eq!(packed, expected);
        assert_eq!(full.weight, full2.weight);
    }

    #[test]
    fn opposite_nyquist_samples_share_a_voxel() {
        // In a grid of 8, frequencies -4 and +4 are the same voxel
        let grid = ComplexGrid::new([8, 8, 8], iso(1.0));
        assert_eq!(grid.voxel([-4, 0, 0]), grid.voxel([4, 0, 0]));
        assert_eq!(grid.voxel([-4, -4, -4]), grid.voxel([4, 4, 4]));
        // With half a voxel per pixel, h = -2 and h = +2 land on x = -4 and x = +4
        let mut grid = ComplexGrid::new([8, 8, 1], iso(1.0));
        let p = labelled_projection(8, Matrix3::identity());
        let coarse = PackParams { scale: 0.5, ..params(Interpolation::NearestNeighbour) };
        pack_volume(&mut grid, &p, &coarse);
        let edge = index3_to_1([4, 0, 0], [8, 8, 1]);
        assert_float_eq!(grid.weight[edge], 2.0, ulps <= 1);
        assert_float_eq!(grid.complex[edge].re, 0.0, abs <= 1e-6);
    }

    #[test]
    fn slab_packing_matches_full_packing() {
        let n = 8;
        let dims = [n, n, 6];
        let p = labelled_projection(n, tilt_matrix(0.6, 0.3));
        let params = params(Interpolation::Trilinear);
        let mut full = ComplexGrid::new(dims, iso(1.0));
        pack_volume(&mut full, &p, &params);
        for z in [0..2, 2..5, 5..6] {
            let mut slab = ComplexGrid::slab(dims, z.clone(), iso(1.0)).unwrap();
            pack_volume(&mut slab, &p, &params);
            let range = z.start * n * n..z.end * n * n;
            assert_eq!(slab.weight, full.weight[range.clone()]);
            assert_eq!(slab.complex, full.complex[range]);
        }
    }

    #[test]
    fn packing_never_decreases_weight_or_coverage() {
        let n = 8;
        let mut grid = ComplexGrid::new([n, n, n], iso(1.0));
        let params = params(Interpolation::Trilinear);
        let mut coverage = grid.coverage().covered;
        let mut weight = grid.weight.clone();
        for tilt in [-0.8, -0.3, 0.0, 0.4, 0.9] {
            pack_volume(&mut grid, &labelled_projection(n, tilt_matrix(tilt, 0.2)), &params);
            assert!(grid.coverage().covered >= coverage);
            assert!(grid.weight.iter().zip(&weight).all(|(now, before)| now >= before));
            coverage = grid.coverage().covered;
            weight = grid.weight.clone();
        }
        assert!(coverage > 0);
    }

    // ----- Central sections ------------------------------------------------------------
    fn section_grids(n: usize) -> (ComplexGrid, ComplexGrid) {
        (ComplexGrid::new([n, n, 1], iso(1.0)), ComplexGrid::new([n, n, 1], iso(1.0)))
    }

    #[test]
    fn reference_micrograph_only_enters_full_grid() {
        let n = 8;
        let (mut full, mut loo) = section_grids(n);
        let reference = tilt_matrix(0.3, 0.0);
        let mut p = labelled_projection(n, reference);
        p.in_plane = true;
        let section = SectionParams { hi_res: 2.0, zsize: 4 };
        let packed = pack_central_section(&mut full, &mut loo, &p, &reference, &section).unwrap();
        assert!(packed > 0);
        assert!(full.weight.iter().any(|&w| w > 0.0));
        assert!(loo .weight.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn same_orientation_maps_samples_onto_themselves() {
        let n = 8;
        let (mut full, mut loo) = section_grids(n);
        let reference = tilt_matrix(-0.5, 1.1);
        let p = labelled_projection(n, reference);
        // Stay clear of the Nyquist edge, where +4 and -4 would share a voxel
        let section = SectionParams { hi_res: 4.0, zsize: 4 };
        pack_central_section(&mut full, &mut loo, &p, &reference, &section).unwrap();
        assert_eq!(full.weight, loo.weight);
        for i in 0..full.len() {
            if full.weight[i] > WEIGHT_FLOOR {
                let [h, k, _] = full.frequency_of(i);
                let c = full.complex[i] / full.weight[i];
                assert_float_eq!(c.re, h as f32, abs <= 1e-4);
                assert_float_eq!(c.im, k as f32, abs <= 1e-4);
            }
        }
    }

    #[test]
    fn strongly_tilted_neighbour_contributes_only_near_tilt_axis() {
        let n = 16;
        let (mut full, mut loo) = section_grids(n);
        let reference = tilt_matrix(0.0, 0.0);
        // Tilted about x by 60 degrees: away from the axis (k != 0) samples
        // leave the band around the reference plane of a thick specimen
        let p = labelled_projection(n, tilt_matrix(std::f64::consts::FRAC_PI_3, 0.0));
        let section = SectionParams { hi_res: 2.0, zsize: 16 };
        pack_central_section(&mut full, &mut loo, &p, &reference, &section).unwrap();
        for i in 0..loo.len() {
            if loo.weight[i] > 0.0 {
                let [_, k, _] = loo.frequency_of(i);
                assert!(k.abs() <= 1, "k = {k}");
            }
        }
        assert!(loo.weight.iter().any(|&w| w > 0.0));
    }

    #[test]
    fn central_section_grids_must_agree() {
        let mut full = ComplexGrid::new([8, 8, 1], iso(1.0));
        let mut loo  = ComplexGrid::new([4, 4, 1], iso(1.0));
        let p = labelled_projection(8, Matrix3::identity());
        let section = SectionParams { hi_res: 2.0, zsize: 4 };
        let result = pack_central_section(&mut full, &mut loo, &p, &Matrix3::identity(), &section);
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }

    #[rstest(/**/ text, expected,
             case("nearest"          , Interpolation::NearestNeighbour),
             case("weighted_nearest" , Interpolation::WeightedNearest),
             case("trilinear"        , Interpolation::Trilinear),
    )]
    fn interpolation_from_str(text: &str, expected: Interpolation) {
        assert_eq!(text.parse::<Interpolation>().unwrap(), expected);
    }
}
