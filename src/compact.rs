//! Slot compaction: renumber live slots densely and drop tombstones.
//!
//! The permutation preserves the relative order of live slots, so every
//! destination index is less than or equal to its source. That ordering
//! is what lets the dataset move run in place: each batch is copied into
//! a bounded scratch buffer first, then written back to its compacted
//! position, and no source row is overwritten before it has been read.

use log::debug;
use rayon::prelude::*;

use crate::data::DenseVectors;
use crate::elements::Element;
use crate::error::{QuiverError, Result};
use crate::graph::AdjacencyGraph;
use crate::threads::ThreadPool;

/// Marker in `old_to_new` for slots that do not survive.
pub const DROPPED: u32 = u32::MAX;

/// Build the compaction permutation for `n_slots` slots.
///
/// Returns `(new_to_old, old_to_new)`; tombstoned slots map to
/// [`DROPPED`]. `new_to_old` is ascending, preserving live relative
/// order.
pub fn build_permutation(n_slots: usize, is_deleted: impl Fn(u32) -> bool) -> (Vec<u32>, Vec<u32>) {
    let mut new_to_old = Vec::new();
    let mut old_to_new = vec![DROPPED; n_slots];
    for old in 0..n_slots as u32 {
        if !is_deleted(old) {
            old_to_new[old as usize] = new_to_old.len() as u32;
            new_to_old.push(old);
        }
    }
    (new_to_old, old_to_new)
}

/// Move every surviving row to its compacted position and truncate.
///
/// `batch_size` bounds the scratch buffer; each batch is staged there in
/// parallel, then written back in parallel.
pub fn compact_vectors<T: Element>(
    data: &mut DenseVectors<T>,
    new_to_old: &[u32],
    batch_size: usize,
    pool: &ThreadPool,
) -> Result<()> {
    debug_assert!(new_to_old.windows(2).all(|w| w[0] < w[1]), "permutation must be ascending");
    let dims = data.dimensions();
    let batch_size = batch_size.max(1);
    let mut scratch: Vec<T> = vec![T::from_f32(0.0); batch_size.min(new_to_old.len().max(1)) * dims];

    let mut start = 0usize;
    while start < new_to_old.len() {
        let stop = (start + batch_size).min(new_to_old.len());
        let batch = &new_to_old[start..stop];
        let rows = batch.len();

        // Stage the batch in the scratch buffer.
        {
            let source: &DenseVectors<T> = data;
            pool.install(|| {
                scratch[..rows * dims]
                    .par_chunks_mut(dims)
                    .enumerate()
                    .for_each(|(i, row)| row.copy_from_slice(source.get(batch[i])));
            });
        }

        // Write back to the compacted destinations [start, stop).
        {
            let flat = data.as_flat_mut();
            let destination = &mut flat[start * dims..stop * dims];
            let staged = &scratch[..rows * dims];
            pool.install(|| {
                destination
                    .par_chunks_mut(dims)
                    .zip(staged.par_chunks(dims))
                    .for_each(|(out, row)| out.copy_from_slice(row));
            });
        }
        start = stop;
    }

    data.truncate(new_to_old.len());
    debug!("compacted dataset to {} rows (batch {})", new_to_old.len(), batch_size);
    Ok(())
}

/// Rewrite the adjacency under the permutation.
///
/// Node `new` receives the renumbered list of `new_to_old[new]`;
/// references to dropped slots are discarded.
pub fn compact_graph(
    graph: &AdjacencyGraph,
    new_to_old: &[u32],
    old_to_new: &[u32],
    pool: &ThreadPool,
) -> Result<AdjacencyGraph> {
    let max_degree = graph.max_degree();
    let mut compacted = AdjacencyGraph::with_nodes(new_to_old.len(), max_degree)?;

    {
        let (storage, lengths, stride) = compacted.raw_parts_mut();
        pool.install(|| {
            storage
                .par_chunks_mut(stride)
                .zip(lengths.par_iter_mut())
                .enumerate()
                .for_each(|(new_slot, (row, length))| {
                    let old_slot = new_to_old[new_slot];
                    let mut filled = 0usize;
                    for &old_neighbor in graph.neighbors(old_slot) {
                        let mapped = old_to_new[old_neighbor as usize];
                        if mapped != DROPPED {
                            row[filled] = mapped;
                            filled += 1;
                        }
                    }
                    *length = filled as u32;
                });
        });
    }
    Ok(compacted)
}

/// Map entry points through the permutation, dropping any that vanished.
pub fn remap_entry_points(entry_points: &[u32], old_to_new: &[u32]) -> Result<Vec<u32>> {
    let remapped: Vec<u32> = entry_points
        .iter()
        .map(|&e| old_to_new[e as usize])
        .filter(|&e| e != DROPPED)
        .collect();
    if remapped.len() != entry_points.len() {
        return Err(QuiverError::internal("an entry point was tombstoned at compaction time"));
    }
    Ok(remapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_skips_deleted_and_preserves_order() {
        let deleted = [false, true, false, false, true];
        let (new_to_old, old_to_new) = build_permutation(5, |slot| deleted[slot as usize]);
        assert_eq!(new_to_old, vec![0, 2, 3]);
        assert_eq!(old_to_new, vec![0, DROPPED, 1, 2, DROPPED]);
    }

    #[test]
    fn vectors_move_to_compacted_slots() {
        let pool = ThreadPool::new(2).unwrap();
        let mut data = DenseVectors::new(2).unwrap();
        for i in 0..6 {
            data.append(&[i as f32, 10.0 * i as f32]).unwrap();
        }
        let new_to_old = vec![0, 2, 5];

        // Batch smaller than the survivor count exercises the two-pass
        // staging across batches.
        compact_vectors(&mut data, &new_to_old, 2, &pool).unwrap();
        assert_eq!(data.size(), 3);
        assert_eq!(data.get(0), &[0.0, 0.0]);
        assert_eq!(data.get(1), &[2.0, 20.0]);
        assert_eq!(data.get(2), &[5.0, 50.0]);
    }

    #[test]
    fn batch_size_extremes_are_equivalent() {
        let pool = ThreadPool::new(3).unwrap();
        let build = || {
            let mut data = DenseVectors::<f32>::new(1).unwrap();
            for i in 0..20 {
                data.append(&[i as f32]).unwrap();
            }
            data
        };
        let new_to_old: Vec<u32> = (0..20).filter(|i| i % 3 != 0).collect();

        let mut one = build();
        compact_vectors(&mut one, &new_to_old, 1, &pool).unwrap();
        let mut all = build();
        compact_vectors(&mut all, &new_to_old, 1_000_000, &pool).unwrap();
        assert_eq!(one, all);
    }

    #[test]
    fn graph_rewrite_renumbers_and_drops() {
        let pool = ThreadPool::new(2).unwrap();
        let mut graph = AdjacencyGraph::with_nodes(4, 3).unwrap();
        graph.set_neighbors(0, &[1, 2]).unwrap();
        graph.set_neighbors(2, &[0, 1, 3]).unwrap();
        graph.set_neighbors(3, &[2]).unwrap();

        // Slot 1 is dropped.
        let (new_to_old, old_to_new) = build_permutation(4, |slot| slot == 1);
        let compacted = compact_graph(&graph, &new_to_old, &old_to_new, &pool).unwrap();

        assert_eq!(compacted.n_nodes(), 3);
        assert_eq!(compacted.neighbors(0), &[1]); // old 0 -> [old 2]
        assert_eq!(compacted.neighbors(1), &[0, 2]); // old 2 -> [old 0, old 3]
        assert_eq!(compacted.neighbors(2), &[1]); // old 3 -> [old 2]
        compacted.check_invariants(3).unwrap();
    }

    #[test]
    fn entry_points_are_remapped() {
        let (_, old_to_new) = build_permutation(4, |slot| slot == 1);
        assert_eq!(remap_entry_points(&[2], &old_to_new).unwrap(), vec![1]);
        assert!(remap_entry_points(&[1], &old_to_new).is_err());
    }
}
