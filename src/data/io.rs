//! Dataset loaders and savers.
//!
//! Three logical formats, dispatched on file extension by [`auto_load`]:
//!
//! * `.svs` — the native format: a self-describing header (element kind,
//!   endianness, counts) followed by raw row-major components. Written by
//!   [`save_native`]; `save` then `load` round-trips bitwise.
//! * `.vecs` — repeated `[d: u32][d components]` records; the vector count
//!   is inferred from the file size.
//! * `.bin` — `[n: u32][d: u32]` followed by `n * d` components.
//!
//! All integers and components are little-endian. Saving writes to a
//! temporary sibling path and renames it into place.

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;

use crate::data::DenseVectors;
use crate::elements::{Element, ElementKind};
use crate::error::{QuiverError, Result};

/// Magic bytes opening a native dataset file.
pub const NATIVE_MAGIC: [u8; 4] = *b"QVEC";

/// Current native format version.
pub const NATIVE_FORMAT_VERSION: u32 = 1;

const LITTLE_ENDIAN_TAG: u8 = 0;

/// A dataset whose element type was discovered from a native file header.
#[derive(Debug, Clone)]
pub enum AnyVectors {
    F32(DenseVectors<f32>),
    F16(DenseVectors<half::f16>),
    I8(DenseVectors<i8>),
    U8(DenseVectors<u8>),
}

impl AnyVectors {
    pub fn kind(&self) -> ElementKind {
        match self {
            AnyVectors::F32(_) => ElementKind::F32,
            AnyVectors::F16(_) => ElementKind::F16,
            AnyVectors::I8(_) => ElementKind::I8,
            AnyVectors::U8(_) => ElementKind::U8,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            AnyVectors::F32(d) => d.size(),
            AnyVectors::F16(d) => d.size(),
            AnyVectors::I8(d) => d.size(),
            AnyVectors::U8(d) => d.size(),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            AnyVectors::F32(d) => d.dimensions(),
            AnyVectors::F16(d) => d.dimensions(),
            AnyVectors::I8(d) => d.dimensions(),
            AnyVectors::U8(d) => d.dimensions(),
        }
    }
}

/// Load a dataset, choosing the parser from the file extension.
///
/// `expected_dims`, when given, must match the dimensionality found in the
/// file; a mismatch is an [`QuiverError::InvalidArgument`].
pub fn auto_load<T: Element>(path: &Path, expected_dims: Option<usize>) -> Result<DenseVectors<T>> {
    let data = match extension(path)? {
        "svs" => load_native(path),
        "vecs" => load_vecs(path),
        "bin" => load_bin(path),
        other => Err(QuiverError::invalid_argument(format!(
            "unknown dataset extension `.{other}` for {}",
            path.display()
        ))),
    }?;
    if let Some(dims) = expected_dims {
        if data.dimensions() != dims {
            return Err(QuiverError::invalid_argument(format!(
                "requested {} dimensions but {} stores {}",
                dims,
                path.display(),
                data.dimensions()
            )));
        }
    }
    Ok(data)
}

fn extension(path: &Path) -> Result<&str> {
    path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
        QuiverError::invalid_argument(format!("{} has no recognizable extension", path.display()))
    })
}

/// Load a native `.svs` file whose element type must be `T`.
pub fn load_native<T: Element>(path: &Path) -> Result<DenseVectors<T>> {
    let (kind, n, d, mut reader) = read_native_header(path)?;
    if kind != T::KIND {
        return Err(QuiverError::invalid_argument(format!(
            "{} stores {kind} elements, caller requested {}",
            path.display(),
            T::KIND
        )));
    }
    let data = read_payload::<T>(&mut reader, n, d, path)?;
    debug!("loaded {} vectors of {} dims from {}", n, d, path.display());
    Ok(data)
}

/// Load a native `.svs` file, dispatching on the element kind it declares.
pub fn load_native_any(path: &Path) -> Result<AnyVectors> {
    let (kind, n, d, mut reader) = read_native_header(path)?;
    let loaded = match kind {
        ElementKind::F32 => AnyVectors::F32(read_payload(&mut reader, n, d, path)?),
        ElementKind::F16 => AnyVectors::F16(read_payload(&mut reader, n, d, path)?),
        ElementKind::I8 => AnyVectors::I8(read_payload(&mut reader, n, d, path)?),
        ElementKind::U8 => AnyVectors::U8(read_payload(&mut reader, n, d, path)?),
    };
    debug!(
        "loaded {} vectors of {} dims ({}) from {}",
        n,
        d,
        loaded.kind(),
        path.display()
    );
    Ok(loaded)
}

type NativeHeader = (ElementKind, usize, usize, BufReader<fs::File>);

fn read_native_header(path: &Path) -> Result<NativeHeader> {
    let mut reader = BufReader::new(fs::File::open(path)?);

    let mut magic = [0u8; 4];
    read_exact_or_malformed(&mut reader, &mut magic, path, "header")?;
    if magic != NATIVE_MAGIC {
        return Err(QuiverError::malformed(format!("{} is not a native dataset file", path.display())));
    }

    let version = read_u32(&mut reader, path)?;
    if version != NATIVE_FORMAT_VERSION {
        return Err(QuiverError::malformed(format!(
            "{} has format version {version}, this build reads {NATIVE_FORMAT_VERSION}",
            path.display()
        )));
    }

    let mut tags = [0u8; 4];
    read_exact_or_malformed(&mut reader, &mut tags, path, "header")?;
    let kind = ElementKind::from_code(tags[0])?;
    if tags[1] != LITTLE_ENDIAN_TAG {
        return Err(QuiverError::malformed(format!(
            "{} declares an unsupported byte order",
            path.display()
        )));
    }

    let n = read_u64(&mut reader, path)? as usize;
    let d = read_u64(&mut reader, path)? as usize;
    if d == 0 {
        return Err(QuiverError::malformed(format!("{} declares zero dimensions", path.display())));
    }
    Ok((kind, n, d, reader))
}

fn read_payload<T: Element>(
    reader: &mut BufReader<fs::File>,
    n: usize,
    d: usize,
    path: &Path,
) -> Result<DenseVectors<T>> {
    let elem_size = T::KIND.byte_size();
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let expected = n * d * elem_size;
    if raw.len() != expected {
        return Err(QuiverError::malformed(format!(
            "{} payload holds {} bytes, header promises {}",
            path.display(),
            raw.len(),
            expected
        )));
    }
    let mut storage = Vec::with_capacity(n * d);
    for chunk in raw.chunks_exact(elem_size) {
        storage.push(T::from_le_bytes(chunk));
    }
    DenseVectors::from_flat(storage, d)
}

/// Save a dataset in the native format, atomically.
pub fn save_native<T: Element>(data: &DenseVectors<T>, path: &Path) -> Result<()> {
    let mut bytes = Vec::with_capacity(32 + data.as_flat().len() * T::KIND.byte_size());
    bytes.extend_from_slice(&NATIVE_MAGIC);
    bytes.extend_from_slice(&NATIVE_FORMAT_VERSION.to_le_bytes());
    bytes.push(T::KIND.code());
    bytes.push(LITTLE_ENDIAN_TAG);
    bytes.extend_from_slice(&[0u8; 2]);
    bytes.extend_from_slice(&(data.size() as u64).to_le_bytes());
    bytes.extend_from_slice(&(data.dimensions() as u64).to_le_bytes());
    for &element in data.as_flat() {
        element.write_le_bytes(&mut bytes);
    }
    atomic_write(path, &bytes)?;
    debug!("saved {} vectors of {} dims to {}", data.size(), data.dimensions(), path.display());
    Ok(())
}

/// Write `bytes` to a temporary sibling of `path`, then rename into place.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a `.vecs` file: `[d: u32][d components]` repeated.
pub fn load_vecs<T: Element>(path: &Path) -> Result<DenseVectors<T>> {
    let raw = fs::read(path)?;
    let elem_size = T::KIND.byte_size();
    let mut offset = 0usize;
    let mut dims: Option<usize> = None;
    let mut storage = Vec::new();
    while offset < raw.len() {
        if offset + 4 > raw.len() {
            return Err(QuiverError::malformed(format!(
                "{} is truncated inside a record header",
                path.display()
            )));
        }
        let d = u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]]) as usize;
        offset += 4;
        if d == 0 {
            return Err(QuiverError::malformed(format!("{} declares a zero-length record", path.display())));
        }
        match dims {
            None => dims = Some(d),
            Some(prev) if prev != d => {
                return Err(QuiverError::malformed(format!(
                    "{} mixes record lengths {prev} and {d}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
        let bytes = d * elem_size;
        if offset + bytes > raw.len() {
            return Err(QuiverError::malformed(format!(
                "{} is truncated inside a record payload",
                path.display()
            )));
        }
        for chunk in raw[offset..offset + bytes].chunks_exact(elem_size) {
            storage.push(T::from_le_bytes(chunk));
        }
        offset += bytes;
    }
    let dims = dims.ok_or_else(|| QuiverError::malformed(format!("{} holds no records", path.display())))?;
    let data = DenseVectors::from_flat(storage, dims)?;
    debug!("loaded {} vectors of {} dims from {}", data.size(), dims, path.display());
    Ok(data)
}

/// Load a `.bin` file: `[n: u32][d: u32][n * d components]`.
pub fn load_bin<T: Element>(path: &Path) -> Result<DenseVectors<T>> {
    let raw = fs::read(path)?;
    if raw.len() < 8 {
        return Err(QuiverError::malformed(format!("{} is too short for a header", path.display())));
    }
    let n = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let d = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    if d == 0 {
        return Err(QuiverError::malformed(format!("{} declares zero dimensions", path.display())));
    }
    let elem_size = T::KIND.byte_size();
    let expected = 8 + n * d * elem_size;
    if raw.len() != expected {
        return Err(QuiverError::malformed(format!(
            "{} holds {} bytes, header promises {}",
            path.display(),
            raw.len(),
            expected
        )));
    }
    let mut storage = Vec::with_capacity(n * d);
    for chunk in raw[8..].chunks_exact(elem_size) {
        storage.push(T::from_le_bytes(chunk));
    }
    let data = DenseVectors::from_flat(storage, d)?;
    debug!("loaded {} vectors of {} dims from {}", n, d, path.display());
    Ok(data)
}

fn read_u32(reader: &mut impl Read, path: &Path) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_malformed(reader, &mut buf, path, "header")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact_or_malformed(reader, &mut buf, path, "header")?;
    Ok(u64::from_le_bytes(buf))
}

fn read_exact_or_malformed(
    reader: &mut impl Read,
    buf: &mut [u8],
    path: &Path,
    what: &str,
) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            QuiverError::malformed(format!("{} is truncated inside the {what}", path.display()))
        } else {
            QuiverError::Io(e)
        }
    })
}
