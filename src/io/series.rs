//! Tilt series described by a TOML file listing raw `f32` micrographs.
//!
//! ```toml
//! [[micrograph]]
//! id         = "001"
//! file       = "001.raw"      # relative to the series file
//! size       = [512, 512]
//! pixel_size = "2.5 A"
//! tilt_angle = "-60 deg"
//! tilt_axis  = "85 deg"
//! origin     = [256.0, 256.0] # optional: image centre
//! select     = true           # optional
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::config::tomo::{deserialize_angle, deserialize_length};
use crate::error::ResourceContext;
use crate::io::raw;
use crate::projection::{Micrograph, ProjectionData, RealImage};
use crate::source::ProjectionSource;
use crate::{Anglef64, Error, Lengthf64, Result};

fn serialize_length<S: Serializer>(value: &Lengthf64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value} A"))
}

fn serialize_angle<S: Serializer>(value: &Anglef64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{} deg", value.to_degrees()))
}

fn default_select() -> bool { true }

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct Entry {
    id: String,
    file: PathBuf,
    size: [usize; 2],
    #[serde(deserialize_with = "deserialize_length", serialize_with = "serialize_length")]
    pixel_size: Lengthf64,
    #[serde(deserialize_with = "deserialize_angle", serialize_with = "serialize_angle")]
    tilt_angle: Anglef64,
    #[serde(deserialize_with = "deserialize_angle", serialize_with = "serialize_angle")]
    tilt_axis: Anglef64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<[f64; 2]>,
    #[serde(default = "default_select")]
    select: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
struct SeriesFile {
    #[serde(default)]
    micrograph: Vec<Entry>,
}

/// Tilt series whose micrographs are re-read from disk whenever requested
#[derive(Debug, Clone)]
pub struct RawSeries {
    micrographs: Vec<Micrograph>,
    files: Vec<PathBuf>,
}

impl RawSeries {

    /// Parse the series file at `path`. Image files are not read until needed.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).at(path)?;
        let SeriesFile { micrograph: entries } = toml::from_str(&text)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut micrographs = Vec::with_capacity(entries.len());
        let mut files = Vec::with_capacity(entries.len());
        for e in entries {
            let mut mg = Micrograph::tilted(e.id, e.size, e.pixel_size, e.tilt_angle, e.tilt_axis);
            if let Some(origin) = e.origin { mg = mg.with_origin(origin) }
            if !e.select { mg = mg.deselected() }
            micrographs.push(mg);
            files.push(dir.join(e.file));
        }
        Ok(Self { micrographs, files })
    }

    pub fn micrographs_mut(&mut self) -> &mut [Micrograph] { &mut self.micrographs }
}

impl ProjectionSource for RawSeries {
    fn micrographs(&self) -> &[Micrograph] { &self.micrographs }

    fn load(&self, index: usize) -> Result<ProjectionData> {
        let mg   = self.micrographs.get(index).ok_or(Error::MicrographNotFound(index))?;
        let file = &self.files[index];
        debug!("Reading micrograph {} from {}", mg.id, file.display());
        let [w, h] = mg.dims;
        let data = raw::read_exact(file, w * h)?;
        Ok(ProjectionData::Real(RealImage::new(mg.dims, data)?))
    }
}

/// Write every micrograph of `source` as a raw file next to a new series
/// file at `path`. Only sources of real images can be written.
pub fn write_series<S>(source: &S, path: &Path) -> Result<()>
where
    S: ProjectionSource + ?Sized,
{
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut micrograph = vec![];
    for (i, mg) in source.micrographs().iter().enumerate() {
        let image = match source.load(i)? {
            ProjectionData::Real(image) => image,
            ProjectionData::Transform(_) => return Err(Error::NoImage(mg.id.clone())),
        };
        let file = PathBuf::from(format!("{}.raw", mg.id));
        raw::write(image.data.into_iter(), &dir.join(&file))?;
        micrograph.push(Entry {
            id: mg.id.clone(),
            file,
            size: mg.dims,
            pixel_size: mg.pixel_size,
            tilt_angle: mg.tilt_angle,
            tilt_axis: mg.tilt_axis,
            origin: Some(mg.origin),
            select: mg.selected,
        });
    }
    let text = toml::to_string(&SeriesFile { micrograph })
        .map_err(|e| Error::InvalidConfig(format!("cannot serialize series: {e}")))?;
    std::fs::write(path, text).at(path)
}
