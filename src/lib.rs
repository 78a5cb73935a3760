mod exports;
pub use exports::*;

pub mod backtransform;
pub mod config;
pub mod error;
pub mod fft;
pub mod frc;
pub mod grid;
pub mod index;
pub mod io;
pub mod loo;
pub mod pack;
pub mod phantom;
pub mod projection;
pub mod reconstruct;
pub mod slab;
pub mod source;
pub mod utils;
pub mod weigh;
