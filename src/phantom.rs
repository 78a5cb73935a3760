//! Synthetic tilt series: exact projections of a specimen made of Gaussian
//! blobs.

use std::path::Path;

use itertools::iproduct;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use crate::error::ResourceContext;
use crate::projection::{Micrograph, RealImage};
use crate::source::InMemorySeries;
use crate::{Anglef64, Error, Intensityf32, Lengthf64, Result, Vector3};

/// Spherical Gaussian density
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Blob {
    /// Position relative to the centre of the specimen, in Å
    pub centre: [f64; 3],
    /// Standard deviation in Å
    pub sigma: Lengthf64,
    pub amplitude: Intensityf32,
}

/// Acquisition parameters of a synthetic tilt series
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub dims: [usize; 2],
    pub pixel_size: Lengthf64,
    pub tilt_axis: Anglef64,
    pub tilts: Vec<Anglef64>,
    /// Standard deviation of additive Gaussian noise
    pub noise: Option<f64>,
    pub seed: u64,
}

/// Tilt angles from `-max` to `max` in steps of `step`
pub fn tilt_range(max: Anglef64, step: Anglef64) -> Vec<Anglef64> {
    let n = (max / step).floor() as i64;
    (-n..=n).map(|i| i as f64 * step).collect()
}

/// Phantom made of `[[blob]]` tables, each with a `centre`, `sigma` and `amplitude`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Phantom {
    #[serde(rename = "blob")]
    pub blobs: Vec<Blob>,
}

impl Phantom {

    pub fn new(blobs: Vec<Blob>) -> Self { Self { blobs } }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).at(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Projection of the phantom along the viewing direction of `micrograph`.
    ///
    /// Each blob projects onto a 2D Gaussian of the same width centred on the
    /// in-plane components of its rotated position, measured from the
    /// micrograph origin.
    pub fn project(&self, micrograph: &Micrograph) -> RealImage {
        let [w, h] = micrograph.dims;
        let [ox, oy] = micrograph.origin;
        let px = micrograph.pixel_size;
        let mut data = vec![0.0; w * h];
        for blob in &self.blobs {
            let p = micrograph.orientation * Vector3::from(blob.centre);
            let (cx, cy) = (ox + p.x / px, oy + p.y / px);
            let s2 = 2.0 * (blob.sigma / px).powi(2);
            for (y, x) in iproduct!(0..h, 0..w) {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                data[x + y * w] += blob.amplitude * (-d2 / s2).exp() as Intensityf32;
            }
        }
        RealImage { dims: [w, h], data }
    }

    /// Tilt series of projections of the phantom, with noise if requested
    pub fn tilt_series(&self, acquisition: &Acquisition) -> Result<InMemorySeries> {
        let Acquisition { dims, pixel_size, tilt_axis, ref tilts, noise, seed } = *acquisition;
        let noise = noise
            .map(|sigma| Normal::new(0.0, sigma))
            .transpose()
            .map_err(|e| Error::InvalidConfig(format!("noise: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut series = InMemorySeries::new();
        for (i, &tilt) in tilts.iter().enumerate() {
            let micrograph = Micrograph::tilted(format!("{:03}", i + 1), dims, pixel_size, tilt, tilt_axis);
            let mut image = self.project(&micrograph);
            if let Some(noise) = &noise {
                for v in &mut image.data { *v += noise.sample(&mut rng) as Intensityf32 }
            }
            series.push(micrograph, image);
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ProjectionSource;
    use crate::projection::ProjectionData;
    use float_eq::assert_float_eq;

    fn blob(centre: [f64; 3]) -> Blob { Blob { centre, sigma: 2.0, amplitude: 1.0 } }

    fn peak(image: &RealImage) -> [usize; 2] {
        let (i, _) = image.data.iter().enumerate()
            .fold((0, f32::MIN), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        [i % image.dims[0], i / image.dims[0]]
    }

    #[test]
    fn untilted_blob_projects_to_its_position() {
        let phantom = Phantom::new(vec![blob([4.0, -6.0, 10.0])]);
        let mg = Micrograph::tilted("a", [32, 32], 1.0, 0.0, 0.0);
        let image = phantom.project(&mg);
        assert_eq!(peak(&image), [20, 10]);
        assert_float_eq!(image.data[20 + 10 * 32], 1.0, abs <= 1e-6);
    }

    #[test]
    fn blob_on_tilt_axis_does_not_move() {
        let phantom = Phantom::new(vec![blob([6.0, 0.0, 0.0])]);
        for tilt in tilt_range(1.0, 0.25) {
            let mg = Micrograph::tilted("a", [32, 32], 1.0, tilt, 0.0);
            assert_eq!(peak(&phantom.project(&mg)), [22, 16]);
        }
    }

    #[test]
    fn tilt_range_is_symmetric() {
        let tilts = tilt_range(0.5, 0.2);
        assert_eq!(tilts.len(), 5);
        assert_float_eq!(tilts[0], -0.4, abs <= 1e-12);
        assert_float_eq!(tilts[4],  0.4, abs <= 1e-12);
    }

    #[test]
    fn noisy_series_is_reproducible() {
        let phantom = Phantom::new(vec![blob([0.0, 0.0, 0.0])]);
        let acquisition = Acquisition {
            dims: [16, 16], pixel_size: 1.0, tilt_axis: 0.0,
            tilts: tilt_range(0.6, 0.3), noise: Some(0.1), seed: 42,
        };
        let a = phantom.tilt_series(&acquisition).unwrap();
        let b = phantom.tilt_series(&acquisition).unwrap();
        assert_eq!(a.len(), 5);
        for i in 0..a.len() {
            match (a.load(i).unwrap(), b.load(i).unwrap()) {
                (ProjectionData::Real(x), ProjectionData::Real(y)) => assert_eq!(x, y),
                _ => panic!("expected real images"),
            }
        }
    }

    #[test]
    fn negative_noise_is_rejected() {
        let acquisition = Acquisition {
            dims: [4, 4], pixel_size: 1.0, tilt_axis: 0.0,
            tilts: vec![0.0], noise: Some(-1.0), seed: 0,
        };
        assert!(matches!(Phantom::default().tilt_series(&acquisition), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn phantom_from_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("phantom.toml");
        std::fs::write(&path, "[[blob]]\ncentre = [1.0, 2.0, 3.0]\nsigma = 4.0\namplitude = 0.5\n\n\
                               [[blob]]\ncentre = [0.0, 0.0, 0.0]\nsigma = 1.0\namplitude = 2.0\n")?;
        let phantom = Phantom::read(&path)?;
        assert_eq!(phantom.blobs.len(), 2);
        assert_eq!(phantom.blobs[0], Blob { centre: [1.0, 2.0, 3.0], sigma: 4.0, amplitude: 0.5 });
        assert!(matches!(Phantom::read(&dir.path().join("missing.toml")), Err(Error::Resource { .. })));
        Ok(())
    }
}
