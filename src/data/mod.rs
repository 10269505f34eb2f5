//! Dense vector storage.
//!
//! [`DenseVectors`] owns the dataset as one contiguous row-major
//! allocation so sequential scans run at memory bandwidth, and
//! [`prefetch`](DenseVectors::prefetch) issues a real CPU prefetch for the
//! addressed row. Graph search touches rows in data-dependent order;
//! prefetching the next candidate while computing the current distance is
//! where most of its throughput comes from.

pub mod io;

use crate::elements::Element;
use crate::error::{QuiverError, Result};

/// Owned, row-major dense vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVectors<T: Element> {
    storage: Vec<T>,
    dims: usize,
}

impl<T: Element> DenseVectors<T> {
    /// Create an empty store for `dims`-component vectors.
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(QuiverError::invalid_argument("vector dimensionality must be positive"));
        }
        Ok(DenseVectors { storage: Vec::new(), dims })
    }

    /// Create a store with `count` zero-initialized rows.
    pub fn zeroed(count: usize, dims: usize) -> Result<Self> {
        let mut data = Self::new(dims)?;
        data.storage = vec![T::from_f32(0.0); count * dims];
        Ok(data)
    }

    /// Take ownership of a flat buffer holding `storage.len() / dims` rows.
    pub fn from_flat(storage: Vec<T>, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(QuiverError::invalid_argument("vector dimensionality must be positive"));
        }
        if storage.len() % dims != 0 {
            return Err(QuiverError::invalid_argument(format!(
                "flat buffer of {} elements is not a multiple of {} dimensions",
                storage.len(),
                dims
            )));
        }
        Ok(DenseVectors { storage, dims })
    }

    /// Number of stored vectors (live and tombstoned alike).
    #[inline]
    pub fn size(&self) -> usize {
        self.storage.len() / self.dims
    }

    /// Components per vector.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Borrow the components of slot `i`.
    ///
    /// Panics if `i` is out of range; slot indices are internal and the
    /// engine only produces valid ones.
    #[inline]
    pub fn get(&self, i: u32) -> &[T] {
        let start = i as usize * self.dims;
        &self.storage[start..start + self.dims]
    }

    /// Overwrite slot `i`.
    pub fn set(&mut self, i: u32, vector: &[T]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(QuiverError::invalid_argument(format!(
                "vector has {} components, store expects {}",
                vector.len(),
                self.dims
            )));
        }
        let start = i as usize * self.dims;
        if start + self.dims > self.storage.len() {
            return Err(QuiverError::invalid_argument(format!("slot {i} is out of range")));
        }
        self.storage[start..start + self.dims].copy_from_slice(vector);
        Ok(())
    }

    /// Append a vector, returning its new slot index.
    pub fn append(&mut self, vector: &[T]) -> Result<u32> {
        if vector.len() != self.dims {
            return Err(QuiverError::invalid_argument(format!(
                "vector has {} components, store expects {}",
                vector.len(),
                self.dims
            )));
        }
        let slot = self.size();
        if slot > u32::MAX as usize {
            return Err(QuiverError::invalid_argument("dataset exceeds the u32 slot space"));
        }
        self.storage.extend_from_slice(vector);
        Ok(slot as u32)
    }

    /// Append a vector given as `f32` components, narrowing into `T`.
    pub fn append_f32(&mut self, vector: &[f32]) -> Result<u32> {
        if vector.len() != self.dims {
            return Err(QuiverError::invalid_argument(format!(
                "vector has {} components, store expects {}",
                vector.len(),
                self.dims
            )));
        }
        let slot = self.size();
        if slot > u32::MAX as usize {
            return Err(QuiverError::invalid_argument("dataset exceeds the u32 slot space"));
        }
        self.storage.extend(vector.iter().map(|&x| T::from_f32(x)));
        Ok(slot as u32)
    }

    /// Drop all rows at index `count` and beyond.
    pub fn truncate(&mut self, count: usize) {
        self.storage.truncate(count * self.dims);
    }

    /// Non-binding hint that slot `i` is about to be read.
    #[inline]
    pub fn prefetch(&self, i: u32) {
        let start = i as usize * self.dims;
        if start < self.storage.len() {
            prefetch_read(self.storage[start..].as_ptr());
        }
    }

    /// Widen one row into an `f32` scratch buffer.
    ///
    /// The builder uses stored rows as queries; queries are always `f32`.
    pub fn copy_to_f32(&self, i: u32, out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.get(i).iter().map(|x| x.to_f32()));
    }

    #[inline]
    pub(crate) fn as_flat(&self) -> &[T] {
        &self.storage
    }

    #[inline]
    pub(crate) fn as_flat_mut(&mut self) -> &mut [T] {
        &mut self.storage
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn prefetch_read<T>(ptr: *const T) {
    // SAFETY: prefetch is a hint; the address is in-bounds of a live
    // allocation and never dereferenced.
    unsafe {
        core::arch::x86_64::_mm_prefetch(ptr as *const i8, core::arch::x86_64::_MM_HINT_T0);
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn prefetch_read<T>(_ptr: *const T) {}

/// Borrowed view of a query batch: `len` rows of `dims` `f32` components.
#[derive(Debug, Clone, Copy)]
pub struct VectorsRef<'a> {
    storage: &'a [f32],
    dims: usize,
}

impl<'a> VectorsRef<'a> {
    /// View `storage` as rows of `dims` components.
    pub fn new(storage: &'a [f32], dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(QuiverError::invalid_argument("vector dimensionality must be positive"));
        }
        if storage.len() % dims != 0 {
            return Err(QuiverError::invalid_argument(format!(
                "query buffer of {} elements is not a multiple of {} dimensions",
                storage.len(),
                dims
            )));
        }
        Ok(VectorsRef { storage, dims })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len() / self.dims
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn get(&self, i: usize) -> &'a [f32] {
        &self.storage[i * self.dims..(i + 1) * self.dims]
    }
}
