use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures which make a reconstruction or resolution estimate impossible.
///
/// Numeric degeneracies (empty voxels, empty shells) are not errors: they
/// are replaced by safe defaults where they occur.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no micrographs selected")]
    NoMicrographsSelected,

    #[error("micrograph number {0} not found")]
    MicrographNotFound(usize),

    #[error("micrograph `{0}` has no image data")]
    NoImage(String),

    #[error("size mismatch in {what}: expected {expected:?}, got {got:?}")]
    SizeMismatch {
        what: &'static str,
        expected: [usize; 3],
        got: [usize; 3],
    },

    #[error("slab {start}..{end} does not lie within a volume of depth {depth}")]
    SlabOutsideVolume { start: usize, end: usize, depth: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not parse configuration: {0}")]
    ConfigSyntax(#[from] toml::de::Error),

    #[error("cannot access `{}`: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach the offending path to I/O failures on disk-resident data.
pub trait ResourceContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> ResourceContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Resource { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn resource_errors_name_the_file() {
        let missing = Path::new("/definitely/not/here.raw");
        let err = std::fs::File::open(missing).at(missing).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/definitely/not/here.raw"), "{message}");
        assert!(matches!(err, Error::Resource { .. }));
    }

    #[test]
    fn size_mismatch_message() {
        let err = Error::SizeMismatch { what: "projection", expected: [8, 8, 1], got: [4, 4, 1] };
        assert_eq!(err.to_string(), "size mismatch in projection: expected [8, 8, 1], got [4, 4, 1]");
    }
}
