//! Per-query bounded top-k collectors for the exhaustive engine.
//!
//! A [`BulkSorter`] owns one [`BoundedHeap`] per query. The lifecycle is
//! `prepare` (reset), any number of `insert`/`row` calls from workers that
//! each own a disjoint set of queries at a time, then `cleanup`, which
//! finalizes every row nearest-first.
//!
//! Rows sit behind uncontended mutexes: the flat engine locks a row once
//! per (query tile x data tile), not per insertion, and no two workers
//! hold the same query simultaneously.

use std::marker::PhantomData;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{QuiverError, Result};
use crate::neighbor::{compare, precedes, DistanceOrder, Neighbor};

/// Fixed-capacity collector keeping the k closest entries seen so far.
///
/// Internally a binary heap with the *worst* retained entry at the root,
/// so a full heap rejects or replaces in O(log k).
#[derive(Debug, Clone)]
pub struct BoundedHeap<O: DistanceOrder> {
    capacity: usize,
    entries: Vec<Neighbor>,
    _order: PhantomData<O>,
}

impl<O: DistanceOrder> BoundedHeap<O> {
    pub fn new(capacity: usize) -> Self {
        BoundedHeap { capacity, entries: Vec::with_capacity(capacity), _order: PhantomData }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The worst retained entry, if any.
    #[inline]
    pub fn worst(&self) -> Option<Neighbor> {
        self.entries.first().copied()
    }

    /// Offer a candidate. Kept iff the heap has room or the candidate
    /// ranks before the current worst (ties keep the smaller id).
    pub fn insert(&mut self, candidate: Neighbor) {
        if self.entries.len() < self.capacity {
            self.entries.push(candidate);
            self.sift_up(self.entries.len() - 1);
        } else if precedes::<O>(candidate, self.entries[0]) {
            self.entries[0] = candidate;
            self.sift_down(0);
        }
    }

    /// Consume the heap, returning entries ordered nearest first.
    pub fn into_sorted(mut self) -> Vec<Neighbor> {
        self.entries.sort_unstable_by(|a, b| compare::<O>(*a, *b));
        self.entries
    }

    // `worse(a, b)`: a ranks strictly after b.
    #[inline]
    fn worse(a: Neighbor, b: Neighbor) -> bool {
        precedes::<O>(b, a)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if Self::worse(self.entries[i], self.entries[parent]) {
                self.entries.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut largest = i;
            if left < len && Self::worse(self.entries[left], self.entries[largest]) {
                largest = left;
            }
            if right < len && Self::worse(self.entries[right], self.entries[largest]) {
                largest = right;
            }
            if largest == i {
                return;
            }
            self.entries.swap(i, largest);
            i = largest;
        }
    }
}

/// One bounded heap per query, with the `prepare` / `insert` / `cleanup`
/// lifecycle.
pub struct BulkSorter<O: DistanceOrder> {
    num_neighbors: usize,
    rows: Vec<Mutex<BoundedHeap<O>>>,
}

impl<O: DistanceOrder> BulkSorter<O> {
    pub fn new(num_queries: usize, num_neighbors: usize) -> Result<Self> {
        if num_neighbors == 0 {
            return Err(QuiverError::invalid_argument("num_neighbors must be positive"));
        }
        let rows = (0..num_queries).map(|_| Mutex::new(BoundedHeap::new(num_neighbors))).collect();
        Ok(BulkSorter { num_neighbors, rows })
    }

    #[inline]
    pub fn num_queries(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn num_neighbors(&self) -> usize {
        self.num_neighbors
    }

    /// Reset every row for a fresh search.
    pub fn prepare(&mut self) {
        for row in &mut self.rows {
            row.get_mut().clear();
        }
    }

    /// Lock query `q`'s heap for a stretch of insertions.
    pub fn row(&self, q: usize) -> Result<MutexGuard<'_, BoundedHeap<O>>> {
        self.rows
            .get(q)
            .map(|row| row.lock())
            .ok_or_else(|| QuiverError::invalid_argument(format!("invalid query index {q}")))
    }

    /// Insert one candidate into query `q`'s heap.
    pub fn insert(&self, q: usize, candidate: Neighbor) -> Result<()> {
        self.row(q)?.insert(candidate);
        Ok(())
    }

    /// Finalize: every row sorted nearest first.
    pub fn cleanup(self) -> Vec<Vec<Neighbor>> {
        self.rows.into_iter().map(|row| row.into_inner().into_sorted()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::{MaxSimilarity, MinDistance};

    #[test]
    fn keeps_the_k_closest() {
        let mut heap = BoundedHeap::<MinDistance>::new(3);
        for (id, d) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 2.0), (4, 3.0)] {
            heap.insert(Neighbor::new(id, d));
        }
        let sorted = heap.into_sorted();
        let ids: Vec<_> = sorted.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn similarity_order_keeps_the_largest() {
        let mut heap = BoundedHeap::<MaxSimilarity>::new(2);
        for (id, d) in [(0, 0.1), (1, 0.9), (2, 0.5)] {
            heap.insert(Neighbor::new(id, d));
        }
        let ids: Vec<_> = heap.into_sorted().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn ties_keep_the_smaller_id() {
        let mut heap = BoundedHeap::<MinDistance>::new(2);
        heap.insert(Neighbor::new(9, 1.0));
        heap.insert(Neighbor::new(3, 1.0));
        heap.insert(Neighbor::new(6, 1.0));
        let ids: Vec<_> = heap.into_sorted().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 6]);
    }

    #[test]
    fn worst_tracks_the_eviction_candidate() {
        let mut heap = BoundedHeap::<MinDistance>::new(2);
        assert!(heap.worst().is_none());
        heap.insert(Neighbor::new(0, 1.0));
        heap.insert(Neighbor::new(1, 9.0));
        assert_eq!(heap.worst().unwrap().id, 1);
        heap.insert(Neighbor::new(2, 0.5));
        assert_eq!(heap.worst().unwrap().id, 0);
    }

    #[test]
    fn sorter_lifecycle() {
        let mut sorter = BulkSorter::<MinDistance>::new(2, 2).unwrap();
        sorter.prepare();
        sorter.insert(0, Neighbor::new(5, 0.5)).unwrap();
        sorter.insert(0, Neighbor::new(6, 0.1)).unwrap();
        sorter.insert(1, Neighbor::new(7, 0.9)).unwrap();

        let rows = sorter.cleanup();
        assert_eq!(rows[0][0].id, 6);
        assert_eq!(rows[0][1].id, 5);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn out_of_range_query_index_fails() {
        let sorter = BulkSorter::<MinDistance>::new(2, 2).unwrap();
        assert!(matches!(
            sorter.insert(2, Neighbor::new(0, 0.0)),
            Err(QuiverError::InvalidArgument(_))
        ));
        assert!(sorter.row(9).is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(BulkSorter::<MinDistance>::new(1, 0).is_err());
    }
}
