mod vector;
mod orientation;

pub use vector::{Vector3, Volume, split_floor};
pub use orientation::{Matrix3, tilt_matrix, scale_rows};
