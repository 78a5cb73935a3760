//! Orientation matrices of micrographs in a tilt series.
//!
//! An orientation matrix maps coordinates in the frame of the reconstructed
//! volume into the frame of a micrograph: its rows are the micrograph's x, y
//! and viewing axes expressed in volume coordinates. Its transpose therefore
//! maps a point in the plane of the micrograph back into the volume.

use nalgebra::{Rotation3, Unit};
use crate::Vector3;

pub type Matrix3 = nalgebra::Matrix3<f64>;

/// Orientation of a micrograph tilted by `tilt_angle` (radians) about an
/// in-plane axis which makes the angle `tilt_axis` (radians) with the x-axis.
pub fn tilt_matrix(tilt_angle: f64, tilt_axis: f64) -> Matrix3 {
    let axis = Unit::new_normalize(Vector3::new(tilt_axis.cos(), tilt_axis.sin(), 0.0));
    Rotation3::from_axis_angle(&axis, tilt_angle).matrix().transpose()
}

/// Scale the rows of `m` by the corresponding components of `s`, i.e.
/// `diag(s) * m`.
pub fn scale_rows(m: &Matrix3, s: &Vector3) -> Matrix3 {
    Matrix3::from_diagonal(s) * m
}
