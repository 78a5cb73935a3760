//! Reconstruction of volumes larger than memory, one z-slab at a time.
//!
//! Every slab re-reads and re-packs all selected micrographs, keeping only
//! the samples which fall within it, so that no state is carried from one
//! slab to the next. Each slab is weighed, phase shifted and backtransformed
//! in x and y while in memory, then appended to a complex block on disk which
//! is finally backtransformed along z.

use std::ops::Range;
use std::path::Path;

use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::backtransform::{backtransform_slices, backtransform_z_on_disk, BlockStatistics};
use crate::config::tomo::{Config, Slab};
use crate::grid::{ComplexGrid, Coverage};
use crate::io::raw::RawBlock;
use crate::io::tiles::TileIndex;
use crate::reconstruct::{pack_selected, ReconstructionPlan};
use crate::source::ProjectionSource;
use crate::utils::timing::Progress;
use crate::weigh::weigh;
use crate::{Error, Result};

/// Reconstruct planes `z` of the volume described by `plan`, up to and
/// including the phase shift to the centre of the full volume.
pub fn reconstruct_slab<S>(source: &S, plan: &ReconstructionPlan, z: Range<usize>, progress: &ProgressBar) -> Result<(ComplexGrid, Coverage)>
where
    S: ProjectionSource + ?Sized,
{
    let mut grid = ComplexGrid::slab(plan.dims, z, plan.sampling())?;
    pack_selected(source, plan, &mut grid, progress)?;
    let coverage = weigh(&mut grid);
    grid.phase_shift_to_centre();
    Ok((grid, coverage))
}

#[derive(Debug, Clone)]
pub struct SlabReport {
    pub plan: ReconstructionPlan,
    /// Planes of the full volume reconstructed
    pub z: Range<usize>,
    pub slabs: usize,
    pub coverage: Coverage,
    /// Complex block on disk: backtransformed in all three dimensions if the
    /// full depth was reconstructed, otherwise only in x and y
    pub block: RawBlock,
    /// Statistics of the real-space map, if it was completed
    pub statistics: Option<BlockStatistics>,
    pub tiles: TileIndex,
}

/// Planes to reconstruct: the configured slab range (the whole depth by
/// default) and the thickness of each slab
fn slab_range(config: &Config, depth: usize) -> Result<(Range<usize>, usize)> {
    let Slab { start, end, thickness } = config.slab.clone().unwrap_or(Slab { start: 0, end: None, thickness: depth });
    let end = end.unwrap_or(depth);
    if start >= end || end > depth {
        return Err(Error::SlabOutsideVolume { start, end, depth })
    }
    Ok((start..end, thickness.max(1)))
}

/// Reconstruct the selected micrographs of `source` slab by slab into a
/// complex block at `block_path`, and write the index of y-tiles of the
/// result to `tiles_path`.
pub fn reconstruct_in_slabs<S>(source: &S, config: &Config, block_path: &Path, tiles_path: &Path, progress: &ProgressBar) -> Result<SlabReport>
where
    S: ProjectionSource + ?Sized,
{
    let plan = ReconstructionPlan::new(source, config)?;
    let [nx, ny, nz] = plan.dims;
    let (z, thickness) = slab_range(config, nz)?;
    info!("Reconstructing planes {}..{} of {nx} x {ny} x {nz} in slabs of {thickness}", z.start, z.end);

    let mut timer = Progress::new();
    let mut block = RawBlock::create(block_path, [nx, ny])?;
    let mut coverage = Coverage { covered: 0, total: 0 };
    let mut slabs = 0;
    for start in z.clone().step_by(thickness) {
        let planes = start..(start + thickness).min(z.end);
        timer.start(&format!("Slab {}..{}", planes.start, planes.end));
        let (mut grid, slab_coverage) = reconstruct_slab(source, &plan, planes, progress)?;
        backtransform_slices(&mut grid);
        block.append_planes(&grid.complex)?;
        timer.done_with_message(&format!("Slab {} coverage {slab_coverage}", slabs + 1));
        coverage.covered += slab_coverage.covered;
        coverage.total   += slab_coverage.total;
        slabs += 1;
    }
    info!("Reciprocal space coverage: {coverage}");

    let statistics = if z == (0..nz) {
        timer.start("Backtransforming along z on disk");
        let stats = backtransform_z_on_disk(&block)?;
        timer.done();
        Some(stats)
    } else {
        warn!("Only planes {}..{} of {nz} reconstructed: {} left untransformed along z",
              z.start, z.end, block_path.display());
        None
    };

    let tiles = TileIndex::y_tiles(block.dims(), 0, thickness);
    tiles.write(tiles_path)?;

    Ok(SlabReport { plan, z, slabs, coverage, block, statistics, tiles })
}
