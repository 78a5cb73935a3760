//! In-memory reconstruction of a tilt series.

use std::path::Path;

use indicatif::ProgressBar;
use tracing::info;

use crate::backtransform::BlockStatistics;
use crate::config::tomo::Config;
use crate::fft::{transform_3d, FftDirection};
use crate::grid::{ComplexGrid, Coverage};
use crate::index::{index1_to_3, index3_to_1};
use crate::io::raw;
use crate::pack::{pack_volume, PackParams};
use crate::projection::ft_size;
use crate::source::{load_projection, ProjectionSource};
use crate::utils::{group_digits, timing::Progress};
use crate::weigh::weigh;
use crate::{BoxDim_u, Error, Lengthf64, Result, Vector3};

/// Sizes and sampling of a reconstruction, derived from the configuration
/// and the first selected micrograph
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionPlan {
    /// Requested reconstruction size, in voxels of `pixel_size / scale`
    pub size: BoxDim_u,
    /// Size of the volume actually integrated, after reduction to the
    /// resolution limit
    pub dims: BoxDim_u,
    /// Å per voxel of the integrated volume
    pub voxel_size: Lengthf64,
    /// Size of the square micrograph transforms
    pub ft_size: usize,
    pub pack: PackParams,
    /// Micrographs to pack
    pub selected: Vec<usize>,
}

impl ReconstructionPlan {

    /// The resolution limit is raised to Nyquist of the reconstruction if it
    /// asks for more; when it is coarser than Nyquist, the volume is
    /// integrated at a correspondingly reduced size.
    pub fn new<S>(source: &S, config: &Config) -> Result<Self>
    where
        S: ProjectionSource + ?Sized,
    {
        let selected = source.selected();
        let &first = selected.first().ok_or(Error::NoMicrographsSelected)?;
        let micrograph = &source.micrographs()[first];
        let [w, h] = micrograph.dims;
        if w * h == 0 { return Err(Error::NoImage(micrograph.id.clone())) }
        let px = micrograph.pixel_size;
        let scale = config.scale;

        let size = match config.size {
            Some((x, y, z)) => [x, y, z],
            None => {
                let x = (w as f64 * scale).round() as usize;
                let y = (h as f64 * scale).round() as usize;
                [x, y, (x / 10).max(1)]
            }
        };
        let hi_res = config.hi_res.max(2.0 * px / scale);
        let rec_scale = (2.0 * px / (scale * hi_res)).min(1.0);
        let dims = size.map(|n| ((n as f64 * rec_scale).round() as usize).max(1));
        let scale = scale * rec_scale;

        Ok(Self {
            size,
            dims,
            voxel_size: px / scale,
            ft_size: ft_size(w.max(h), config.scale, config.pad_factor),
            pack: PackParams { hi_res, lo_res: config.lo_res, scale, interpolation: config.interpolation },
            selected,
        })
    }

    pub fn sampling(&self) -> Vector3 { Vector3::repeat(self.voxel_size) }
}

/// Pack every selected micrograph into `grid`, one at a time. Returns the
/// number of samples packed.
pub fn pack_selected<S>(source: &S, plan: &ReconstructionPlan, grid: &mut ComplexGrid, progress: &ProgressBar) -> Result<usize>
where
    S: ProjectionSource + ?Sized,
{
    progress.set_length(plan.selected.len() as u64);
    progress.set_position(0);
    let mut packed = 0;
    for &index in &plan.selected {
        progress.set_message(source.micrographs()[index].id.clone());
        let projection = load_projection(source, index, plan.ft_size)?;
        packed += pack_volume(grid, &projection, &plan.pack);
        progress.inc(1);
    }
    Ok(packed)
}

/// Real-space density map
#[derive(Debug, Clone, PartialEq)]
pub struct RealVolume {
    pub dims: BoxDim_u,
    /// Å per voxel
    pub voxel_size: Lengthf64,
    pub data: Vec<f32>,
}

impl RealVolume {
    pub fn statistics(&self) -> BlockStatistics {
        self.data.iter().map(|&v| v as f64).collect()
    }

    pub fn value(&self, index: BoxDim_u) -> f32 {
        self.data[index3_to_1(index, self.dims)]
    }

    /// Position of the largest value
    pub fn argmax(&self) -> BoxDim_u {
        let (i, _) = self.data.iter().enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
        index1_to_3(i, self.dims)
    }

    pub fn write_raw(&self, path: &Path) -> Result<()> {
        raw::write(self.data.iter().copied(), path)
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub volume: RealVolume,
    /// Figure of merit of each reciprocal-space voxel
    pub fom: Vec<f32>,
    pub coverage: Coverage,
    pub plan: ReconstructionPlan,
}

/// Reconstruct the selected micrographs of `source` into a real-space volume,
/// entirely in memory.
pub fn reconstruct<S>(source: &S, config: &Config, progress: &ProgressBar) -> Result<Reconstruction>
where
    S: ProjectionSource + ?Sized,
{
    let plan = ReconstructionPlan::new(source, config)?;
    let [nx, ny, nz] = plan.dims;
    info!("Reconstruction size {nx} x {ny} x {nz}, {:.3} Å/voxel, resolution limit {:.2} Å, transform size {}",
          plan.voxel_size, plan.pack.hi_res, plan.ft_size);

    let mut timer = Progress::new();
    timer.start(&format!("Packing {} micrographs", plan.selected.len()));
    let mut grid = ComplexGrid::new(plan.dims, plan.sampling());
    let packed = pack_selected(source, &plan, &mut grid, progress)?;
    timer.done_with_message(&format!("Packed {} samples", group_digits(packed)));

    let coverage = weigh(&mut grid);
    info!("Reciprocal space coverage: {coverage}");

    timer.start("Backtransforming");
    grid.phase_shift_to_centre();
    transform_3d(&mut grid.complex, plan.dims, FftDirection::Inverse);
    timer.done();

    let volume = RealVolume {
        dims: plan.dims,
        voxel_size: plan.voxel_size,
        data: grid.complex.iter().map(|c| c.re).collect(),
    };
    let stats = volume.statistics();
    info!("Map statistics: min {:.4}, max {:.4}, avg {:.4}, std {:.4}", stats.min, stats.max, stats.avg(), stats.std());
    Ok(Reconstruction { volume, fom: grid.fom, coverage, plan })
}
