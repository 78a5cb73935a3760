//! Headerless little-endian binary data: real `f32` arrays, and complex
//! blocks of `(re, im)` pairs in `(z, y, x)` row-major order.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::ResourceContext;
use crate::{BoxDim_u, Complex32, Error, Result};

// ----------- read/write float arrays as raw binary --------------------------
pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> Result<()> {
    let file = File::create(path).at(path)?;
    let mut buf = BufWriter::new(file);
    for datum in data {
        buf.write_all(&datum.to_le_bytes()).at(path)?;
    }
    buf.flush().at(path)
}

type IORes<T> = io::Result<T>;
pub fn read<'a>(path: &Path) -> Result<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path).at(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(f32::from_le_bytes(buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Read exactly `n` floats from `path`
pub fn read_exact(path: &Path, n: usize) -> Result<Vec<f32>> {
    let data = read(path)?.collect::<IORes<Vec<_>>>().at(path)?;
    if data.len() != n {
        return Err(Error::SizeMismatch { what: "raw image", expected: [n, 1, 1], got: [data.len(), 1, 1] })
    }
    Ok(data)
}

// ----------- complex values ------------------------------------------------
/// Bytes per complex value
pub const COMPLEX_BYTES: u64 = 8;

pub(crate) fn encode(values: &[Complex32], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.reserve(values.len() * COMPLEX_BYTES as usize);
    for v in values {
        bytes.extend_from_slice(&v.re.to_le_bytes());
        bytes.extend_from_slice(&v.im.to_le_bytes());
    }
}

pub(crate) fn decode(bytes: &[u8], values: &mut [Complex32]) {
    let le = |b: &[u8]| f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    for (v, b) in values.iter_mut().zip(bytes.chunks_exact(COMPLEX_BYTES as usize)) {
        *v = Complex32::new(le(&b[..4]), le(&b[4..]));
    }
}

/// Read `values.len()` complex values starting at value number `offset`
pub(crate) fn read_at(file: &mut File, offset: u64, values: &mut [Complex32], bytes: &mut Vec<u8>) -> IORes<()> {
    bytes.resize(values.len() * COMPLEX_BYTES as usize, 0);
    file.seek(SeekFrom::Start(offset * COMPLEX_BYTES))?;
    file.read_exact(bytes)?;
    decode(bytes, values);
    Ok(())
}

/// Write `values` starting at value number `offset`
pub(crate) fn write_at(file: &mut File, offset: u64, values: &[Complex32], bytes: &mut Vec<u8>) -> IORes<()> {
    encode(values, bytes);
    file.seek(SeekFrom::Start(offset * COMPLEX_BYTES))?;
    file.write_all(bytes)
}

/// A complex volume held on disk rather than in memory.
///
/// The file carries no header: its dimensions live here, and its length must
/// always be exactly `nx * ny * nz` complex values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    path: PathBuf,
    dims: BoxDim_u,
}

impl RawBlock {

    /// New empty block of `nx * ny` planes, truncating any existing file
    pub fn create(path: &Path, [nx, ny]: [usize; 2]) -> Result<Self> {
        File::create(path).at(path)?;
        Ok(Self { path: path.to_owned(), dims: [nx, ny, 0] })
    }

    /// Existing block, which must hold exactly `dims` values
    pub fn open(path: &Path, dims: BoxDim_u) -> Result<Self> {
        let len = std::fs::metadata(path).at(path)?.len();
        let expected = dims.iter().product::<usize>() as u64 * COMPLEX_BYTES;
        if len != expected {
            let planes = (len / (COMPLEX_BYTES * (dims[0] * dims[1]).max(1) as u64)) as usize;
            return Err(Error::SizeMismatch { what: "raw block", expected: dims, got: [dims[0], dims[1], planes] })
        }
        Ok(Self { path: path.to_owned(), dims })
    }

    /// Write an in-memory volume to a new block
    pub fn from_complex(path: &Path, dims: BoxDim_u, data: &[Complex32]) -> Result<Self> {
        let mut block = Self::create(path, [dims[0], dims[1]])?;
        block.append_planes(data)?;
        Ok(block)
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn dims(&self) -> BoxDim_u { self.dims }

    /// Append whole `nx * ny` planes to the end of the block
    pub fn append_planes(&mut self, data: &[Complex32]) -> Result<()> {
        let [nx, ny, nz] = self.dims;
        let plane = nx * ny;
        if plane == 0 || data.len() % plane != 0 {
            return Err(Error::SizeMismatch { what: "appended planes", expected: [nx, ny, data.len() / plane.max(1)],
                                             got: [data.len(), 1, 1] })
        }
        let file = OpenOptions::new().append(true).open(&self.path).at(&self.path)?;
        let mut buf = BufWriter::new(file);
        let mut bytes = vec![];
        for chunk in data.chunks(plane) {
            encode(chunk, &mut bytes);
            buf.write_all(&bytes).at(&self.path)?;
        }
        buf.flush().at(&self.path)?;
        self.dims = [nx, ny, nz + data.len() / plane];
        Ok(())
    }

    /// The whole block, in memory
    pub fn read_all(&self) -> Result<Vec<Complex32>> {
        let n = self.dims.iter().product();
        let mut values = vec![Complex32::default(); n];
        let mut file = File::open(&self.path).at(&self.path)?;
        read_at(&mut file, 0, &mut values, &mut vec![]).at(&self.path)?;
        Ok(values)
    }

    /// Join `parts`, which must share their plane dimensions, along z into a
    /// new block at `path`
    pub fn concatenate(path: &Path, parts: &[RawBlock]) -> Result<Self> {
        let [nx, ny, _] = parts.first().map_or([0; 3], |p| p.dims);
        let mut out = BufWriter::new(File::create(path).at(path)?);
        let mut nz = 0;
        for part in parts {
            if part.dims[..2] != [nx, ny] {
                return Err(Error::SizeMismatch { what: "concatenated block", expected: [nx, ny, part.dims[2]], got: part.dims })
            }
            let mut input = File::open(&part.path).at(&part.path)?;
            io::copy(&mut input, &mut out).at(path)?;
            nz += part.dims[2];
        }
        out.flush().at(path)?;
        Ok(Self { path: path.to_owned(), dims: [nx, ny, nz] })
    }
}
