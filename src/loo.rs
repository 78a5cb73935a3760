//! Leave-one-out (NLOO3D) resolution estimate of a tilt series.
//!
//! For each micrograph under test, the central section with its orientation
//! is reconstructed twice from the micrographs tilted within a window around
//! it: once including the test micrograph (`full`) and once without it
//! (`loo`). Correlating the test micrograph's transform with both sections,
//! shell by shell, shows how far in resolution the rest of the series
//! predicts it. The sums from all micrographs combine into a curve for the
//! whole series.
//!
//! A test runs through the states [`Accumulating`] → [`Weighed`] →
//! [`Correlated`] → [`MicrographResolution`], each consuming the previous one.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::tomo::Config;
use crate::frc::{FrcCurve, ShellMetric};
use crate::grid::{ComplexGrid, Coverage};
use crate::pack::{pack_central_section, SectionParams};
use crate::projection::{ft_size, Projection};
use crate::source::{load_projection, ProjectionSource};
use crate::weigh::weigh;
use crate::{Anglef64, Error, Lengthf64, Matrix3, Result, Vector3};

/// Central sections with and without the test micrograph, being filled
#[derive(Debug, Clone)]
pub struct Accumulating {
    test: Projection,
    reference: Matrix3,
    section: SectionParams,
    full: ComplexGrid,
    loo: ComplexGrid,
    packed: usize,
}

impl Accumulating {

    /// Start a test of `test`, whose transform is packed into the full
    /// section straight away.
    pub fn new(mut test: Projection, section: SectionParams) -> Result<Self> {
        let n = test.size;
        if n == 0 { return Err(Error::NoImage("leave-one-out test micrograph".into())) }
        let px = test.pixel_size;
        let sampling = Vector3::new(px, px, px);
        let mut full = ComplexGrid::new([n, n, 1], sampling);
        let mut loo  = ComplexGrid::new([n, n, 1], sampling);
        test.in_plane = true;
        let reference = test.orientation;
        let packed = pack_central_section(&mut full, &mut loo, &test, &reference, &section)?;
        Ok(Self { test, reference, section, full, loo, packed })
    }

    /// Add a neighbouring micrograph to both sections
    pub fn pack(&mut self, neighbour: &Projection) -> Result<usize> {
        let packed = pack_central_section(&mut self.full, &mut self.loo, neighbour, &self.reference, &self.section)?;
        self.packed += packed;
        Ok(packed)
    }

    /// Number of samples packed so far
    pub fn packed(&self) -> usize { self.packed }

    pub fn weigh(mut self) -> Weighed {
        let full = weigh(&mut self.full);
        let loo  = weigh(&mut self.loo);
        Weighed { test: self.test, full: self.full, loo: self.loo, coverage: [full, loo] }
    }
}

/// Averaged central sections
#[derive(Debug, Clone)]
pub struct Weighed {
    test: Projection,
    full: ComplexGrid,
    loo: ComplexGrid,
    /// Coverage of the full and leave-one-out sections
    pub coverage: [Coverage; 2],
}

impl Weighed {
    pub fn correlate(self, hi_res: Lengthf64, sampling_ratio: f64, metric: ShellMetric) -> Result<Correlated> {
        let curve = FrcCurve::between(&self.test.data, &self.full, &self.loo, hi_res, sampling_ratio, metric)?;
        Ok(Correlated { curve })
    }
}

#[derive(Debug, Clone)]
pub struct Correlated {
    pub curve: FrcCurve,
}

impl Correlated {
    pub fn resolve(self, cutoff: f64) -> (FrcCurve, Lengthf64) {
        let resolution = self.curve.resolution(cutoff);
        (self.curve, resolution)
    }
}

/// Outcome of the leave-one-out test of one micrograph
#[derive(Debug, Clone)]
pub struct MicrographResolution {
    pub index: usize,
    pub id: String,
    pub tilt_angle: Anglef64,
    pub curve: FrcCurve,
    pub resolution: Lengthf64,
}

/// Outcome of the leave-one-out tests of a whole series
#[derive(Debug, Clone)]
pub struct SeriesResolution {
    pub micrographs: Vec<MicrographResolution>,
    /// Combination of the shell sums of all micrographs
    pub curve: FrcCurve,
    pub resolution: Lengthf64,
}

/// Transform size and specimen thickness used for the central sections of
/// micrographs with dimensions `[w, h]`
fn section_geometry(config: &Config, [w, h]: [usize; 2]) -> (usize, usize) {
    let (xsize, zsize) = config.size.map_or((w, w), |(x, _, z)| (x, z));
    let zsize = zsize.min(w).min(h).max(1);
    let ft = ft_size(xsize, config.scale, config.pad_factor).max(w).max(h);
    (ft, zsize)
}

/// Leave-one-out test of micrograph `index`. `None` if it is not selected.
pub fn micrograph_resolution<S>(source: &S, index: usize, config: &Config) -> Result<Option<MicrographResolution>>
where
    S: ProjectionSource + ?Sized,
{
    let micrographs = source.micrographs();
    let micrograph = micrographs.get(index).ok_or(Error::MicrographNotFound(index))?;
    if !micrograph.selected { return Ok(None) }

    // No finer than Nyquist of the reconstruction
    let hi_res = config.hi_res.max(2.0 * micrograph.pixel_size / config.scale);
    let (ft, zsize) = section_geometry(config, micrograph.dims);
    let section = SectionParams { hi_res, zsize };
    let test = load_projection(source, index, ft)?;
    let mut accumulating = Accumulating::new(test, section)?;

    let window = config.resolution.window;
    for (j, neighbour) in micrographs.iter().enumerate() {
        if j == index || !neighbour.selected { continue }
        if (neighbour.tilt_angle - micrograph.tilt_angle).abs() > window { continue }
        accumulating.pack(&load_projection(source, j, ft)?)?;
    }
    debug!("Micrograph {}: {} samples in central sections", micrograph.id, accumulating.packed());

    let resolution = &config.resolution;
    let (curve, res) = accumulating
        .weigh()
        .correlate(hi_res, resolution.sampling_ratio, resolution.metric)?
        .resolve(resolution.cutoff);
    debug!("Micrograph {}: resolution {res:.2} Å", micrograph.id);

    Ok(Some(MicrographResolution {
        index,
        id: micrograph.id.clone(),
        tilt_angle: micrograph.tilt_angle,
        curve,
        resolution: res,
    }))
}

/// Leave-one-out test of every selected micrograph, in parallel, combined
/// into a curve and resolution for the whole series.
pub fn series_resolution<S>(source: &S, config: &Config) -> Result<SeriesResolution>
where
    S: ProjectionSource + ?Sized,
{
    let selected = source.selected();
    if selected.is_empty() { return Err(Error::NoMicrographsSelected) }
    info!("Leave-one-out resolution of {} micrographs", selected.len());

    let micrographs = selected
        .par_iter()
        .map(|&index| micrograph_resolution(source, index, config))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let mut curves = micrographs.iter().map(|m| &m.curve);
    let mut curve = match curves.next() {
        Some(first) => first.clone(),
        None => return Err(Error::NoMicrographsSelected),
    };
    for other in curves { curve.merge(other)? }
    let resolution = curve.resolution(config.resolution.cutoff);
    info!("Series resolution: {resolution:.2} Å");

    Ok(SeriesResolution { micrographs, curve, resolution })
}
