//! Configuration file parser for tomographic reconstruction

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, de};

use crate::error::{Error, Result, ResourceContext};
use crate::frc::ShellMetric;
use crate::pack::Interpolation;
use crate::{Anglef64, Lengthf64};
use crate::utils::parse_with_unit;

const LENGTH_UNITS: &[(&str, f64)] = &[("A", 1.0), ("Å", 1.0), ("nm", 10.0)];
const ANGLE_UNITS : &[(&str, f64)] = &[("rad", 1.0), ("deg", std::f64::consts::PI / 180.0), ("°", std::f64::consts::PI / 180.0)];

/// Parse a length such as `"8 A"` or `"1.2 nm"` into Å
pub fn parse_length(s: &str) -> std::result::Result<Lengthf64, String> { parse_with_unit(s, LENGTH_UNITS) }

/// Parse an angle such as `"60 deg"` or `"0.5 rad"` into radians
pub fn parse_angle(s: &str) -> std::result::Result<Anglef64, String> { parse_with_unit(s, ANGLE_UNITS) }

pub(crate) fn deserialize_length<'d, D: Deserializer<'d>>(deserializer: D) -> std::result::Result<Lengthf64, D::Error> {
    let s = <&str>::deserialize(deserializer)?;
    parse_length(s).map_err(de::Error::custom)
}

pub(crate) fn deserialize_length_opt<'d, D: Deserializer<'d>>(deserializer: D) -> std::result::Result<Option<Lengthf64>, D::Error> {
    Option::<&str>::deserialize(deserializer)?
        .map(parse_length)
        .transpose()
        .map_err(de::Error::custom)
}

pub(crate) fn deserialize_angle<'d, D: Deserializer<'d>>(deserializer: D) -> std::result::Result<Anglef64, D::Error> {
    let s = <&str>::deserialize(deserializer)?;
    parse_angle(s).map_err(de::Error::custom)
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {

    /// Finest resolution to include in the reconstruction
    #[serde(deserialize_with = "deserialize_length")]
    pub hi_res: Lengthf64,

    /// Coarsest resolution to include; everything is included if absent
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_length_opt")]
    pub lo_res: Option<Lengthf64>,

    /// Reconstruction voxels per micrograph pixel
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Padding applied to micrographs before Fourier transformation. 0 means
    /// transform at the reconstruction scale without further padding.
    #[serde(default = "default_pad_factor")]
    pub pad_factor: usize,

    /// Reconstruction size in voxels; derived from the micrographs if absent
    #[serde(default)]
    pub size: Option<(usize, usize, usize)>,

    #[serde(default)]
    pub interpolation: Interpolation,

    /// Out-of-core reconstruction in z-slabs
    #[serde(default)]
    pub slab: Option<Slab>,

    #[serde(default)]
    pub resolution: Resolution,

    /// Size of the thread pool; rayon's default if absent
    #[serde(default)]
    pub threads: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Slab {
    /// First z-plane to reconstruct
    #[serde(default)]
    pub start: usize,
    /// One past the last z-plane to reconstruct; the full depth if absent
    #[serde(default)]
    pub end: Option<usize>,
    /// Number of z-planes held in memory at once
    #[serde(default = "default_thickness")]
    pub thickness: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    /// FRC threshold defining the resolution
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,

    /// Shells are this many times wider than the finest sampling allows
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    /// Only micrographs within this tilt angle of the test micrograph take
    /// part in its leave-one-out estimate
    #[serde(default = "default_window")]
    #[serde(deserialize_with = "deserialize_angle")]
    pub window: Anglef64,

    /// Statistic computed in each shell
    #[serde(default)]
    pub metric: ShellMetric,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            sampling_ratio: default_sampling_ratio(),
            window: default_window(),
            metric: ShellMetric::default(),
        }
    }
}

fn default_scale         () -> f64      { 1.0 }
fn default_pad_factor    () -> usize    { 2 }
fn default_thickness     () -> usize    { 64 }
fn default_cutoff        () -> f64      { 0.5 }
fn default_sampling_ratio() -> f64      { 1.0 }
fn default_window        () -> Anglef64 { std::f64::consts::PI }

impl Config {

    /// Configuration with every optional setting at its default value
    pub fn new(hi_res: Lengthf64) -> Self {
        Self {
            hi_res,
            lo_res: None,
            scale: default_scale(),
            pad_factor: default_pad_factor(),
            size: None,
            interpolation: Interpolation::default(),
            slab: None,
            resolution: Resolution::default(),
            threads: None,
        }
    }

    /// Reject settings which cannot produce a meaningful reconstruction
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| -> Result<()> { Err(Error::InvalidConfig(msg)) };
        if !(self.hi_res > 0.0) { return bad(format!("hi_res must be positive, got {}", self.hi_res)) }
        if !(self.scale  > 0.0) { return bad(format!("scale must be positive, got {}", self.scale)) }
        if let Some(lo_res) = self.lo_res {
            if lo_res <= self.hi_res {
                return bad(format!("lo_res ({lo_res} A) must be coarser than hi_res ({} A)", self.hi_res))
            }
        }
        if let Some((x, y, z)) = self.size {
            if x * y * z == 0 { return bad(format!("size must be non-zero in all dimensions, got {:?}", (x, y, z))) }
        }
        if let Some(Slab { start, end, thickness }) = self.slab {
            if thickness == 0 { return bad("slab thickness must be positive".into()) }
            if let Some(end) = end {
                if end <= start { return bad(format!("empty slab range {start}..{end}")) }
            }
        }
        let Resolution { cutoff, sampling_ratio, window, .. } = self.resolution;
        if !(cutoff > 0.0 && cutoff < 1.0) { return bad(format!("resolution cutoff must lie in (0,1), got {cutoff}")) }
        if !(sampling_ratio >= 1.0)        { return bad(format!("sampling_ratio must be at least 1, got {sampling_ratio}")) }
        if !(window > 0.0)                 { return bad(format!("neighbour window must be positive, got {window}")) }
        if self.threads == Some(0)         { return bad("threads must be positive".into()) }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path).at(path)?;
    let config: Config = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use std::f64::consts::PI;

    // ----- Some helpers to make the tests more concise ---------------------------------
    //  ---  Parse string as TOML  -------------------------
    fn parse<'d, D: Deserialize<'d>>(input: &'d str) -> D {
        toml::from_str(input).unwrap()
    }
    //  ---  Parse string as TOML, with explicit error reporting -------------------------
    fn parse_carefully<'d, D: Deserialize<'d>>(input: &'d str) -> std::result::Result<D, toml::de::Error> {
        toml::from_str(input)
    }
    //  ---  Macro for concise assertions about values of parsed fields -------------------
    macro_rules! check {
        ($type:ident($text:expr).$field:ident = $expected:expr) => {
            let config: $type = parse::<$type>($text);
            println!("DESERIALIZED: {config:?}");
            assert_eq!(config.$field, $expected);
        };
        ($type:ident($text:expr) fields: $($field:ident = $expected:expr);+$(;)?) => {
            let config: $type = parse::<$type>($text);
            println!("DESERIALIZED: {config:?}");
            $(assert_eq!(config.$field, $expected);)*
        }
    }
    // ----- Test deserializing of individual aspects of the Config type ----------------
    #[test]
    fn config_defaults() {
        check!{Config(r#"hi_res = "20 A""#) fields:
               hi_res        = 20.0;
               lo_res        = None;
               scale         = 1.0;
               pad_factor    = 2;
               size          = None;
               interpolation = Interpolation::Trilinear;
               slab          = None;
               resolution    = Resolution::default();
               threads       = None;
        }
    }

    #[test]
    fn config_resolution_limits_with_units() {
        check!{Config(r#"
                 hi_res = "1.6 nm"
                 lo_res = "200 Å"
               "#) fields:
               hi_res = 16.0;
               lo_res = Some(200.0);
        }
    }

    #[test]
    fn config_reconstruction_geometry() {
        check!{Config(r#"
                 hi_res        = "10 A"
                 scale         = 0.5
                 pad_factor    = 0
                 size          = [100, 120, 30]
                 interpolation = "weighted_nearest"
               "#) fields:
               scale         = 0.5;
               pad_factor    = 0;
               size          = Some((100, 120, 30));
               interpolation = Interpolation::WeightedNearest;
        }
    }

    #[test]
    fn config_slab() {
        check!{Config(r#"
                 hi_res = "10 A"
                 [slab]
                 start = 10
                 end   = 50
               "#).slab = Some(Slab { start: 10, end: Some(50), thickness: 64 })
        }
    }

    #[test]
    fn config_resolution_section() {
        let config: Config = parse(r#"
            hi_res = "10 A"
            [resolution]
            cutoff = 0.3
            window = "30 deg"
            metric = "fsc"
        "#);
        assert_float_eq!(config.resolution.cutoff, 0.3, ulps <= 1);
        assert_float_eq!(config.resolution.sampling_ratio, 1.0, ulps <= 1);
        assert_float_eq!(config.resolution.window, PI / 6.0, ulps <= 2);
        assert_eq!(config.resolution.metric, ShellMetric::Fsc);
    }

    // ----- Make sure that unknown fields and units are not accepted --------------------
    #[test]
    fn config_reject_unknown_field() {
        assert!(parse_carefully::<Config>("hi_res = \"8 A\"\nunknown_field = 666").is_err());
    }

    #[test]
    fn config_reject_unknown_unit() {
        assert!(parse_carefully::<Config>("hi_res = \"8 mm\"").is_err());
    }

    #[test]
    fn config_requires_hi_res() {
        assert!(parse_carefully::<Config>("scale = 2.0").is_err());
    }

    // ----- Validation ------------------------------------------------------------------
    #[test]
    fn default_config_is_valid() {
        assert!(Config::new(10.0).validate().is_ok());
    }

    #[test]
    fn validation_rejects_nonsense() {
        let invalid = |f: fn(&mut Config)| {
            let mut config = Config::new(10.0);
            f(&mut config);
            matches!(config.validate(), Err(Error::InvalidConfig(_)))
        };
        assert!(invalid(|c| c.scale = 0.0));
        assert!(invalid(|c| c.hi_res = -1.0));
        assert!(invalid(|c| c.lo_res = Some(5.0)));
        assert!(invalid(|c| c.size = Some((10, 0, 10))));
        assert!(invalid(|c| c.resolution.cutoff = 1.5));
        assert!(invalid(|c| c.resolution.sampling_ratio = 0.5));
        assert!(invalid(|c| c.slab = Some(Slab { start: 5, end: Some(5), thickness: 4 })));
        assert!(invalid(|c| c.slab = Some(Slab { start: 0, end: None, thickness: 0 })));
        assert!(invalid(|c| c.threads = Some(0)));
    }

    // ----- Test an example on-disk config file -----------------------------------------
    #[test]
    fn test_config_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tomo.toml");
        std::fs::write(&path, "hi_res = \"12 A\"\nscale = 0.5\n[resolution]\ncutoff = 0.3\n")?;
        let config = read_config_file(&path)?;
        assert_float_eq!(config.hi_res, 12.0, ulps <= 1);
        assert_float_eq!(config.scale, 0.5, ulps <= 1);
        Ok(())
    }
}
