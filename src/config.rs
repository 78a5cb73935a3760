pub mod tomo;
