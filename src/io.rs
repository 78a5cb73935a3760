pub mod raw;
pub mod series;
pub mod tiles;
