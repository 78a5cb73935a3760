//! Conversion between 1d and 3d indices, and between array indices and
//! signed frequencies.
//!
//! Arrays are stored with x varying fastest, then y, then z, so the flat
//! index of `[x, y, z]` is `x + (y + z * ny) * nx`.

use std::ops::{Add, Div, Mul, Rem};

#[allow(non_camel_case_types)] pub type Index1_u = usize;
#[allow(non_camel_case_types)] pub type Index3_u = [usize; 3];
#[allow(non_camel_case_types)] pub type BoxDim_u = [usize; 3];

#[inline]
pub fn index3_to_1<T>([ix, iy, iz]: [T; 3], [nx, ny, _nz]: [T; 3]) -> T
where
    T: Mul<Output = T> + Add<Output = T>
{
    ix + (iy + iz * ny) * nx
}

#[inline]
#[allow(clippy::many_single_char_names)]
pub fn index1_to_3<T>(i: T, [nx, ny, _nz]: [T; 3]) -> [T; 3]
where
    T: Mul<Output = T> +
    Div<Output = T> +
    Rem<Output = T> +
    Copy
{
    let z = i / (nx * ny);
    let r = i % (nx * ny);
    let y = r / nx;
    let x = r % nx;
    [x,y,z]
}

/// Signed frequency stored at index `i` of an axis of length `n`.
///
/// Non-negative frequencies occupy the lower half of the axis, negative
/// ones wrap around to the upper half.
#[inline]
pub fn frequency(i: usize, n: usize) -> i64 {
    if i > (n - 1) / 2 { i as i64 - n as i64 }
    else               { i as i64 }
}

/// Index along an axis of length `n` at which frequency (or any other
/// periodic coordinate) `i` is stored.
#[inline]
pub fn wrap(i: i64, n: usize) -> usize {
    i.rem_euclid(n as i64) as usize
}
