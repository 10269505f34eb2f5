//! Distance kernels between an `f32` query and a stored element slice.
//!
//! Every kernel accumulates into four independent lanes and combines them
//! in a fixed order, so a given (query, vector) pair produces a
//! bit-identical result on every call. Keep that property: search
//! determinism and the tie-breaking rules depend on it.

use crate::elements::Element;

/// Dot product of a query against a stored vector.
#[inline]
#[must_use]
pub fn dot<T: Element>(a: &[f32], b: &[T]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        acc[0] += a[i] * b[i].to_f32();
        acc[1] += a[i + 1] * b[i + 1].to_f32();
        acc[2] += a[i + 2] * b[i + 2].to_f32();
        acc[3] += a[i + 3] * b[i + 3].to_f32();
    }
    let mut tail = 0.0f32;
    for i in chunks * 4..a.len() {
        tail += a[i] * b[i].to_f32();
    }
    ((acc[0] + acc[1]) + (acc[2] + acc[3])) + tail
}

/// Squared L2 (Euclidean) distance of a query against a stored vector.
///
/// No square root is taken; the ordering is the same and callers compare
/// raw values.
#[inline]
#[must_use]
pub fn l2_squared<T: Element>(a: &[f32], b: &[T]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        let d0 = a[i] - b[i].to_f32();
        let d1 = a[i + 1] - b[i + 1].to_f32();
        let d2 = a[i + 2] - b[i + 2].to_f32();
        let d3 = a[i + 3] - b[i + 3].to_f32();
        acc[0] += d0 * d0;
        acc[1] += d1 * d1;
        acc[2] += d2 * d2;
        acc[3] += d3 * d3;
    }
    let mut tail = 0.0f32;
    for i in chunks * 4..a.len() {
        let d = a[i] - b[i].to_f32();
        tail += d * d;
    }
    ((acc[0] + acc[1]) + (acc[2] + acc[3])) + tail
}

/// L2 norm of an `f32` vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// L2 norm of a stored vector.
#[inline]
#[must_use]
pub fn norm_elements<T: Element>(v: &[T]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = v.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        let x0 = v[i].to_f32();
        let x1 = v[i + 1].to_f32();
        let x2 = v[i + 2].to_f32();
        let x3 = v[i + 3].to_f32();
        acc[0] += x0 * x0;
        acc[1] += x1 * x1;
        acc[2] += x2 * x2;
        acc[3] += x3 * x3;
    }
    let mut tail = 0.0f32;
    for i in chunks * 4..v.len() {
        let x = v[i].to_f32();
        tail += x * x;
    }
    (((acc[0] + acc[1]) + (acc[2] + acc[3])) + tail).sqrt()
}
