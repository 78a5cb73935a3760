/// Command line interface for `tomorec` executable
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "tomorec", about = "Fourier reconstruction of electron tomography tilt series", version)]
pub (super) struct Cli {
    /// Maximum number of rayon threads [default: `threads` in the configuration file, then all cores]
    #[clap(short = 'j', long, global = true)]
    pub threads: Option<usize>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub (super) enum Command {

    /// Reconstruct a tilt series in memory and write the real-space map
    Reconstruct {
        #[clap(flatten)]
        input: Input,

        /// Real-space map output file (raw f32)
        #[clap(short, long, default_value = "reconstruction.raw")]
        out: PathBuf,

        /// Also write the reciprocal-space figure of merit (raw f32)
        #[clap(long)]
        fom: Option<PathBuf>,
    },

    /// Reconstruct a tilt series in z-slabs, backtransforming on disk
    Slabs {
        #[clap(flatten)]
        input: Input,

        /// Complex block file, overwritten
        #[clap(short, long, default_value = "block.raw")]
        block: PathBuf,

        /// Tile index written next to the block
        #[clap(short, long, default_value = "y.tiles")]
        tiles: PathBuf,

        /// Convert the backtransformed block to a real-space map
        #[clap(short, long)]
        out: Option<PathBuf>,

        /// Element type of the real-space map
        #[clap(short = 'd', long, default_value = "f32")]
        data_type: DataType,

        /// Rescale the map to this average and standard deviation
        #[clap(long, value_parser = parse_pair::<f64>)]
        rescale: Option<(f64, f64)>,

        /// Truncate the map to these limits, after rescaling
        #[clap(long, value_parser = parse_pair::<f64>)]
        cut: Option<(f64, f64)>,
    },

    /// Estimate the resolution of a tilt series by leave-one-out FRC
    Resolution {
        #[clap(flatten)]
        input: Input,

        /// Print the combined correlation curve
        #[clap(long)]
        curve: bool,
    },

    /// Write a synthetic tilt series of a phantom made of Gaussian blobs
    Simulate {
        /// Series file to write; micrographs are written next to it
        out: PathBuf,

        /// TOML file with `[[blob]]` tables [default: built-in phantom]
        #[clap(short, long)]
        phantom: Option<PathBuf>,

        /// Micrograph width and height in pixels
        #[clap(short, long, value_parser = parse_pair::<usize>, default_value = "64,64")]
        size: (usize, usize),

        /// Pixel size
        #[clap(long, value_parser = parse_length, default_value = "2 A")]
        pixel_size: Lengthf64,

        /// Largest tilt angle
        #[clap(long, value_parser = parse_angle, default_value = "60 deg")]
        max_tilt: Anglef64,

        /// Tilt increment
        #[clap(long, value_parser = parse_angle, default_value = "3 deg")]
        step: Anglef64,

        /// In-plane angle of the tilt axis
        #[clap(long, value_parser = parse_angle, default_value = "0 deg")]
        axis: Anglef64,

        /// Standard deviation of additive Gaussian noise
        #[clap(short, long)]
        noise: Option<f64>,

        /// Seed of the noise generator
        #[clap(long, default_value = "0")]
        seed: u64,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub (super) struct Input {
    /// Tilt series file listing the micrographs
    pub series: PathBuf,

    /// Reconstruction configuration file
    #[clap(short, long)]
    pub config: PathBuf,
}

/// Parse `"a,b"` into a pair
fn parse_pair<T: FromStr>(s: &str) -> Result<(T, T), String>
where
    T::Err: std::fmt::Display,
{
    let (a, b) = s.split_once(',').ok_or_else(|| format!("expected two comma-separated values, got `{s}`"))?;
    let parse = |x: &str| x.trim().parse::<T>().map_err(|e| format!("`{x}`: {e}"));
    Ok((parse(a)?, parse(b)?))
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::{path::PathBuf, str::FromStr};
use tomorec::{
    Anglef64, Lengthf64,
    backtransform::DataType,
    config::tomo::{parse_angle, parse_length},
};
