//! Micrographs of a tilt series, and their Fourier transforms prepared for
//! packing into reciprocal space.

use std::f64::consts::TAU;

use geometry::tilt_matrix;

use crate::fft::{transform_2d, FftDirection};
use crate::index::{frequency, wrap};
use crate::{Anglef64, Complex32, Error, Intensityf32, Lengthf64, Matrix3, Result};

/// Everything known about one micrograph except its pixels
#[derive(Clone, Debug, PartialEq)]
pub struct Micrograph {
    pub id: String,
    /// Image size in pixels
    pub dims: [usize; 2],
    /// Å per pixel
    pub pixel_size: Lengthf64,
    /// Position, in pixels, of the tilt axis / reconstruction centre in the image
    pub origin: [f64; 2],
    pub tilt_angle: Anglef64,
    pub tilt_axis: Anglef64,
    /// Maps volume coordinates into the frame of this micrograph
    pub orientation: Matrix3,
    pub selected: bool,
}

impl Micrograph {

    /// Selected micrograph with its origin at the image centre, oriented
    /// according to its tilt
    pub fn tilted(id: impl Into<String>, dims: [usize; 2], pixel_size: Lengthf64, tilt_angle: Anglef64, tilt_axis: Anglef64) -> Self {
        Self {
            id: id.into(),
            dims,
            pixel_size,
            origin: [(dims[0] / 2) as f64, (dims[1] / 2) as f64],
            tilt_angle,
            tilt_axis,
            orientation: tilt_matrix(tilt_angle, tilt_axis),
            selected: true,
        }
    }

    pub fn with_origin(mut self, origin: [f64; 2]) -> Self {
        self.origin = origin;
        self
    }

    pub fn deselected(mut self) -> Self {
        self.selected = false;
        self
    }
}

/// Real-space micrograph pixels, x varying fastest
#[derive(Clone, Debug, PartialEq)]
pub struct RealImage {
    pub dims: [usize; 2],
    pub data: Vec<Intensityf32>,
}

impl RealImage {

    pub fn new(dims: [usize; 2], data: Vec<Intensityf32>) -> Result<Self> {
        if data.len() != dims[0] * dims[1] {
            return Err(Error::SizeMismatch { what: "image data", expected: [dims[0], dims[1], 1], got: [data.len(), 1, 1] })
        }
        Ok(Self { dims, data })
    }

    /// Average and standard deviation of the pixel values
    pub fn statistics(&self) -> (f64, f64) {
        let n = self.data.len().max(1) as f64;
        let (sum, sum2) = self.data.iter()
            .map(|&v| v as f64)
            .fold((0.0, 0.0), |(s, s2), v| (s + v, s2 + v * v));
        let avg = sum / n;
        let var = (sum2 / n - avg * avg).max(0.0);
        (avg, var.sqrt())
    }

    /// Rescale to zero average and unit standard deviation. Flat images are
    /// only shifted to zero average.
    pub fn normalize(&mut self) {
        let (avg, std) = self.statistics();
        let scale = if std > 0.0 { 1.0 / std } else { 1.0 };
        self.data.iter_mut().for_each(|v| *v = ((*v as f64 - avg) * scale) as Intensityf32);
    }
}

/// Fourier-transformed micrograph, ready for packing
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Transform size: the data are `size * size` complex values
    pub size: usize,
    /// Zero frequency at index 0; phases refer to the micrograph origin
    pub data: Vec<Complex32>,
    pub orientation: Matrix3,
    /// Å per pixel of the real-space micrograph
    pub pixel_size: Lengthf64,
    /// Set for the micrograph under test in a leave-one-out estimate
    pub in_plane: bool,
}

impl Projection {

    /// Pad `image` to `ft_size` with its average, transform it and move the
    /// phase origin from the array corner to the micrograph origin.
    pub fn from_image(image: &RealImage, micrograph: &Micrograph, ft_size: usize) -> Result<Self> {
        let [w, h] = image.dims;
        if w > ft_size || h > ft_size {
            return Err(Error::SizeMismatch { what: "micrograph larger than transform",
                                             expected: [ft_size, ft_size, 1], got: [w, h, 1] })
        }
        let (avg, _) = image.statistics();
        let mut data = vec![Complex32::new(avg as f32, 0.0); ft_size * ft_size];
        for (y, row) in image.data.chunks(w).enumerate() {
            for (x, &v) in row.iter().enumerate() {
                data[x + y * ft_size] = Complex32::new(v, 0.0);
            }
        }
        transform_2d(&mut data, [ft_size, ft_size], FftDirection::Forward);
        let mut projection = Self {
            size: ft_size,
            data,
            orientation: micrograph.orientation,
            pixel_size: micrograph.pixel_size,
            in_plane: false,
        };
        projection.phase_shift_to_origin(micrograph.origin);
        Ok(projection)
    }

    /// Projection without data: packs nothing
    pub fn empty(orientation: Matrix3, pixel_size: Lengthf64) -> Self {
        Self { size: 0, data: vec![], orientation, pixel_size, in_plane: false }
    }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Sample at signed frequency `(h, k)`
    #[inline]
    pub fn sample(&self, h: i64, k: i64) -> Complex32 {
        self.data[wrap(h, self.size) + wrap(k, self.size) * self.size]
    }

    /// Shift the phase origin by `origin` pixels, so that the point at
    /// `origin` in real space becomes the array origin.
    pub fn phase_shift_to_origin(&mut self, [ox, oy]: [f64; 2]) {
        let n = self.size;
        let (sx, sy) = (TAU * ox / n as f64, TAU * oy / n as f64);
        for (y, row) in self.data.chunks_mut(n).enumerate() {
            let phase_y = frequency(y, n) as f64 * sy;
            for (x, v) in row.iter_mut().enumerate() {
                let phase = frequency(x, n) as f64 * sx + phase_y;
                *v *= Complex32::new(phase.cos() as f32, phase.sin() as f32);
            }
        }
    }
}

/// What a projection source can supply for one micrograph
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectionData {
    /// Raw pixels, still to be normalized and transformed
    Real(RealImage),
    /// Already transformed, with phases referring to the micrograph origin
    Transform(Projection),
}

/// Size of the square Fourier transform for micrographs `xsize` pixels
/// wide, reconstructed at `scale` voxels per pixel.
///
/// Without padding the transform is just large enough for the scaled
/// micrograph; otherwise it is the next power of two above the padded size
/// (padding is limited to a factor of 8).
pub fn ft_size(xsize: usize, scale: f64, pad_factor: usize) -> usize {
    let unpadded = if scale > 1.0 { (xsize as f64 * scale) as usize } else { xsize };
    if pad_factor < 1 { return unpadded }
    let pad_factor = pad_factor.min(8);
    let padded = ((pad_factor * xsize) as f64 * scale) as usize;
    let size = padded.max(1).next_power_of_two();
    if size < xsize { xsize.next_power_of_two() }
    else            { size }
}
