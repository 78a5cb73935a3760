//! Thin layer over `rustfft` for the transforms used by reconstruction.
//!
//! Multi-dimensional data are stored with x varying fastest. Backward
//! transforms are normalized, so that a forward transform followed by a
//! backward one reproduces the input.

use std::sync::Arc;

use ndarray::{ArrayViewMut1, ArrayViewMut2, ArrayViewMut3, Axis};
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

pub use rustfft::FftDirection;

use crate::{BoxDim_u, Complex32};

/// A planned 1D transform together with the buffers needed to apply it to
/// contiguous or strided lines.
pub struct LineTransform {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    line: Vec<Complex32>,
    norm: f32,
}

impl LineTransform {

    pub fn new(n: usize, direction: FftDirection) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft(n, direction);
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];
        let norm = match direction {
            FftDirection::Forward  => 1.0,
            FftDirection::Inverse => 1.0 / n as f32,
        };
        Self { fft, scratch, line: vec![Complex32::default(); n], norm }
    }

    pub fn len(&self) -> usize { self.line.len() }

    /// Transform every consecutive run of `len()` values in `data`.
    pub fn process(&mut self, data: &mut [Complex32]) {
        self.fft.process_with_scratch(data, &mut self.scratch);
        if self.norm != 1.0 {
            data.iter_mut().for_each(|v| *v *= self.norm);
        }
    }

    /// Transform a (possibly strided) line of exactly `len()` values.
    pub fn process_lane(&mut self, mut lane: ArrayViewMut1<Complex32>) {
        let mut line = std::mem::take(&mut self.line);
        line.iter_mut().zip(lane.iter()).for_each(|(l, v)| *l = *v);
        self.process(&mut line);
        lane.iter_mut().zip(line.iter()).for_each(|(v, l)| *v = *l);
        self.line = line;
    }

    /// Transform every column of a plane stored row by row.
    pub fn process_columns(&mut self, mut plane: ArrayViewMut2<Complex32>) {
        for column in plane.columns_mut() {
            self.process_lane(column);
        }
    }
}

/// 2D transform of square or rectangular images with dimensions `[nx, ny]`.
pub struct Fft2 {
    dims: [usize; 2],
    x: LineTransform,
    y: LineTransform,
}

impl Fft2 {

    pub fn new([nx, ny]: [usize; 2], direction: FftDirection) -> Self {
        Self {
            dims: [nx, ny],
            x: LineTransform::new(nx, direction),
            y: LineTransform::new(ny, direction),
        }
    }

    /// Transform the image in `data` in place. `data` must hold exactly
    /// `nx * ny` values.
    pub fn process(&mut self, data: &mut [Complex32]) {
        let [nx, ny] = self.dims;
        assert_eq!(data.len(), nx * ny, "image of {nx} x {ny} pixels");
        self.x.process(data);
        if let Ok(plane) = ArrayViewMut2::from_shape((ny, nx), data) {
            self.y.process_columns(plane);
        }
    }
}

/// Transform a single image with dimensions `[nx, ny]` in place.
pub fn transform_2d(data: &mut [Complex32], dims: [usize; 2], direction: FftDirection) {
    Fft2::new(dims, direction).process(data)
}

/// 2D transform of every z-slice of a volume, slices in parallel.
pub fn transform_slices(data: &mut [Complex32], [nx, ny, _nz]: BoxDim_u, direction: FftDirection) {
    data.par_chunks_mut(nx * ny)
        .for_each_init(|| Fft2::new([nx, ny], direction),
                       |fft, slice| fft.process(slice));
}

/// 1D transform along z of every (x, y) line of a volume, one xz-plane per
/// task.
pub fn transform_z(data: &mut [Complex32], [nx, ny, nz]: BoxDim_u, direction: FftDirection) {
    assert_eq!(data.len(), nx * ny * nz, "volume of {nx} x {ny} x {nz} voxels");
    let Ok(mut volume) = ArrayViewMut3::from_shape((nz, ny, nx), data) else { return };
    volume.axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each_init(|| LineTransform::new(nz, direction),
                       |fft, plane| fft.process_columns(plane));
}

/// Full 3D transform of a volume in place.
pub fn transform_3d(data: &mut [Complex32], dims: BoxDim_u, direction: FftDirection) {
    transform_slices(data, dims, direction);
    transform_z     (data, dims, direction);
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use crate::index::{index3_to_1, frequency};

    fn assert_close(a: &[Complex32], b: &[Complex32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (a, b) in a.iter().zip(b) {
            assert_float_eq!(a.re, b.re, abs <= tol);
            assert_float_eq!(a.im, b.im, abs <= tol);
        }
    }

    fn some_volume(dims: BoxDim_u) -> Vec<Complex32> {
        let n = dims[0] * dims[1] * dims[2];
        (0..n).map(|i| Complex32::new((i as f32 * 0.37).sin(), (i as f32 * 0.11).cos()))
              .collect()
    }

    #[test]
    fn forward_then_backward_is_identity_3d() {
        let dims = [6, 4, 5];
        let original = some_volume(dims);
        let mut data = original.clone();
        transform_3d(&mut data, dims, FftDirection::Forward);
        transform_3d(&mut data, dims, FftDirection::Inverse);
        assert_close(&data, &original, 1e-5);
    }

    #[test]
    fn forward_then_backward_is_identity_2d() {
        let dims = [8, 3];
        let original = some_volume([8, 3, 1]);
        let mut data = original.clone();
        transform_2d(&mut data, dims, FftDirection::Forward);
        transform_2d(&mut data, dims, FftDirection::Inverse);
        assert_close(&data, &original, 1e-5);
    }

    #[test]
    fn delta_transforms_to_constant() {
        let dims = [4, 4, 4];
        let mut data = vec![Complex32::default(); 64];
        data[0] = Complex32::new(1.0, 0.0);
        transform_3d(&mut data, dims, FftDirection::Forward);
        assert_close(&data, &vec![Complex32::new(1.0, 0.0); 64], 1e-6);
    }

    #[test]
    fn single_frequency_transforms_back_to_plane_wave() {
        let dims @ [nx, ny, nz] = [8, 4, 6];
        let (h, k, l) = (1_i64, -1_i64, 2_i64);
        let mut data = vec![Complex32::default(); nx * ny * nz];
        let at = index3_to_1([h.rem_euclid(nx as i64) as usize,
                              k.rem_euclid(ny as i64) as usize,
                              l.rem_euclid(nz as i64) as usize], dims);
        data[at] = Complex32::new(1.0, 0.0);
        transform_3d(&mut data, dims, FftDirection::Inverse);
        let n = (nx * ny * nz) as f32;
        for z in 0..nz { for y in 0..ny { for x in 0..nx {
            let phase = std::f64::consts::TAU * (h as f64 * x as f64 / nx as f64 +
                                                 k as f64 * y as f64 / ny as f64 +
                                                 l as f64 * z as f64 / nz as f64);
            let expected = Complex32::new(phase.cos() as f32, phase.sin() as f32) / n;
            let got = data[index3_to_1([x, y, z], dims)];
            assert_float_eq!(got.re, expected.re, abs <= 1e-6);
            assert_float_eq!(got.im, expected.im, abs <= 1e-6);
        }}}
        // Sanity check of the frequency convention used above
        assert_eq!(frequency(7, 8), -1);
    }

    #[test]
    fn slices_then_z_equals_full_transform() {
        let dims = [4, 6, 8];
        let original = some_volume(dims);
        let mut full = original.clone();
        transform_3d(&mut full, dims, FftDirection::Inverse);
        let mut staged = original;
        transform_z     (&mut staged, dims, FftDirection::Inverse);
        transform_slices(&mut staged, dims, FftDirection::Inverse);
        assert_close(&full, &staged, 1e-5);
    }

    #[test]
    #[should_panic]
    fn image_of_wrong_size_is_rejected() {
        let mut data = vec![Complex32::new(1.0, 0.0); 12];
        transform_2d(&mut data, [4, 4], FftDirection::Forward);
    }

    #[test]
    #[should_panic]
    fn volume_of_wrong_size_is_rejected() {
        let mut data = vec![Complex32::new(1.0, 0.0); 4 * 4 * 3];
        transform_z(&mut data, [4, 4, 4], FftDirection::Forward);
    }
}
