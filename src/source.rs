//! Supply of micrographs to the reconstruction.
//!
//! Projections are requested one at a time and dropped once packed, so a
//! source may re-read its micrographs from disk on every request rather than
//! hold them in memory.

use crate::projection::{Micrograph, Projection, ProjectionData, RealImage};
use crate::{Error, Result};

pub trait ProjectionSource: Sync {
    /// Metadata of every micrograph in the series, selected or not
    fn micrographs(&self) -> &[Micrograph];

    /// Pixels or transform of micrograph number `index`
    fn load(&self, index: usize) -> Result<ProjectionData>;

    /// Indices of micrographs selected for reconstruction
    fn selected(&self) -> Vec<usize> {
        self.micrographs().iter()
            .enumerate()
            .filter(|(_, mg)| mg.selected)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Load micrograph `index` from `source` and bring it into the form needed for
/// packing: normalized, padded to `ft_size` and transformed.
pub fn load_projection<S>(source: &S, index: usize, ft_size: usize) -> Result<Projection>
where
    S: ProjectionSource + ?Sized,
{
    let micrograph = source.micrographs().get(index).ok_or(Error::MicrographNotFound(index))?;
    match source.load(index)? {
        ProjectionData::Real(mut image) => {
            if image.data.is_empty() { return Err(Error::NoImage(micrograph.id.clone())) }
            image.normalize();
            Projection::from_image(&image, micrograph, ft_size)
        }
        ProjectionData::Transform(projection) => {
            if projection.size != ft_size {
                return Err(Error::SizeMismatch { what: "transformed micrograph",
                                                 expected: [ft_size, ft_size, 1],
                                                 got: [projection.size, projection.size, 1] })
            }
            Ok(projection)
        }
    }
}

/// A tilt series held entirely in memory
#[derive(Clone, Debug, Default)]
pub struct InMemorySeries {
    micrographs: Vec<Micrograph>,
    data: Vec<ProjectionData>,
}

impl InMemorySeries {

    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, micrograph: Micrograph, image: RealImage) {
        self.micrographs.push(micrograph);
        self.data.push(ProjectionData::Real(image));
    }

    pub fn push_transform(&mut self, micrograph: Micrograph, projection: Projection) {
        self.micrographs.push(micrograph);
        self.data.push(ProjectionData::Transform(projection));
    }

    pub fn micrographs_mut(&mut self) -> &mut [Micrograph] { &mut self.micrographs }

    pub fn len(&self) -> usize { self.micrographs.len() }

    pub fn is_empty(&self) -> bool { self.micrographs.is_empty() }
}

impl ProjectionSource for InMemorySeries {
    fn micrographs(&self) -> &[Micrograph] { &self.micrographs }

    fn load(&self, index: usize) -> Result<ProjectionData> {
        self.data.get(index).cloned().ok_or(Error::MicrographNotFound(index))
    }
}
