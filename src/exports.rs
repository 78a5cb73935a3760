pub use crate::error::{Error, Result};

pub use rustfft::num_complex::Complex32;

pub type Lengthf64    = f64; // Ångström
pub type Anglef64     = f64; // radians
pub type Weightf32    = f32;
pub type Intensityf32 = f32;

pub use geometry::{Matrix3, Vector3};

pub use crate::index::{BoxDim_u, Index1_u, Index3_u};

pub use crate::grid::ComplexGrid;
pub use crate::source::ProjectionSource;
