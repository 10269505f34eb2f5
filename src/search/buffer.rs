//! The bounded priority buffer driving greedy beam search.
//!
//! Entries stay sorted best-first under the distance order with ties by
//! ascending slot id, each carrying a `visited` flag that marks whether
//! its adjacency has been expanded. The duplicate check on push is a
//! linear scan; the buffer holds tens to hundreds of entries, where a
//! scan beats any auxiliary structure.

use std::marker::PhantomData;

use crate::error::{QuiverError, Result};
use crate::neighbor::{precedes, DistanceOrder, Neighbor, SearchNeighbor};

/// Fixed-capacity sorted beam with per-entry visited flags.
#[derive(Debug, Clone)]
pub struct SearchBuffer<O: DistanceOrder> {
    capacity: usize,
    entries: Vec<SearchNeighbor>,
    _order: PhantomData<O>,
}

impl<O: DistanceOrder> SearchBuffer<O> {
    /// A buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(QuiverError::invalid_argument("search buffer capacity must be positive"));
        }
        Ok(SearchBuffer { capacity, entries: Vec::with_capacity(capacity + 1), _order: PhantomData })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Offer a candidate.
    ///
    /// Rejected when the buffer is full and the worst resident ranks
    /// before the candidate. An entry with the same id is replaced rather
    /// than duplicated (keeping whichever ranks better, and its expansion
    /// state). Returns `true` if the buffer changed.
    pub fn push(&mut self, candidate: Neighbor) -> bool {
        if let Some(at) = self.entries.iter().position(|e| e.id == candidate.id) {
            if precedes::<O>(candidate, self.entries[at].neighbor()) {
                let was_visited = self.entries[at].visited();
                self.entries.remove(at);
                let mut entry = SearchNeighbor::from(candidate);
                if was_visited {
                    entry.set_visited();
                }
                let pos = self.insertion_point(candidate);
                self.entries.insert(pos, entry);
                return true;
            }
            return false;
        }

        let pos = self.insertion_point(candidate);
        if pos == self.capacity {
            return false;
        }
        self.entries.insert(pos, SearchNeighbor::from(candidate));
        self.entries.truncate(self.capacity);
        true
    }

    fn insertion_point(&self, candidate: Neighbor) -> usize {
        self.entries.partition_point(|e| precedes::<O>(e.neighbor(), candidate))
    }

    /// The best entry not yet expanded, marked visited on return.
    pub fn next_unvisited(&mut self) -> Option<Neighbor> {
        let entry = self.entries.iter_mut().find(|e| !e.visited())?;
        entry.set_visited();
        Some(entry.neighbor())
    }

    #[inline]
    pub fn has_unvisited(&self) -> bool {
        self.entries.iter().any(|e| !e.visited())
    }

    /// The best `k` entries, nearest first.
    pub fn best_k(&self, k: usize) -> &[SearchNeighbor] {
        &self.entries[..k.min(self.entries.len())]
    }

    /// All resident entries, nearest first.
    pub fn entries(&self) -> &[SearchNeighbor] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::MinDistance;

    type Buffer = SearchBuffer<MinDistance>;

    #[test]
    fn keeps_sorted_order_and_capacity() {
        let mut buffer = Buffer::new(3).unwrap();
        assert!(buffer.push(Neighbor::new(0, 5.0)));
        assert!(buffer.push(Neighbor::new(1, 1.0)));
        assert!(buffer.push(Neighbor::new(2, 3.0)));
        assert!(buffer.is_full());

        // Better than the worst: evicts it.
        assert!(buffer.push(Neighbor::new(3, 2.0)));
        let ids: Vec<_> = buffer.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        // Worse than everything resident: rejected.
        assert!(!buffer.push(Neighbor::new(4, 9.0)));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn duplicates_are_replaced_not_duplicated() {
        let mut buffer = Buffer::new(4).unwrap();
        buffer.push(Neighbor::new(7, 3.0));
        assert!(!buffer.push(Neighbor::new(7, 3.0)));
        assert_eq!(buffer.len(), 1);

        // A closer rendition of the same id replaces the old entry.
        assert!(buffer.push(Neighbor::new(7, 1.0)));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.entries()[0].distance, 1.0);
    }

    #[test]
    fn next_unvisited_walks_best_first() {
        let mut buffer = Buffer::new(4).unwrap();
        buffer.push(Neighbor::new(0, 2.0));
        buffer.push(Neighbor::new(1, 1.0));
        buffer.push(Neighbor::new(2, 3.0));

        assert_eq!(buffer.next_unvisited().unwrap().id, 1);
        assert_eq!(buffer.next_unvisited().unwrap().id, 0);

        // A new closer arrival becomes the next frontier entry.
        buffer.push(Neighbor::new(3, 0.5));
        assert_eq!(buffer.next_unvisited().unwrap().id, 3);
        assert_eq!(buffer.next_unvisited().unwrap().id, 2);
        assert!(buffer.next_unvisited().is_none());
        assert!(!buffer.has_unvisited());
    }

    #[test]
    fn ties_order_by_ascending_id() {
        let mut buffer = Buffer::new(4).unwrap();
        buffer.push(Neighbor::new(9, 1.0));
        buffer.push(Neighbor::new(2, 1.0));
        buffer.push(Neighbor::new(5, 1.0));
        let ids: Vec<_> = buffer.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn best_k_clamps_to_len() {
        let mut buffer = Buffer::new(8).unwrap();
        buffer.push(Neighbor::new(0, 1.0));
        buffer.push(Neighbor::new(1, 2.0));
        assert_eq!(buffer.best_k(5).len(), 2);
        assert_eq!(buffer.best_k(1)[0].id, 0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut buffer = Buffer::new(2).unwrap();
        buffer.push(Neighbor::new(0, 1.0));
        buffer.next_unvisited();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.next_unvisited().is_none());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Buffer::new(0).is_err());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::neighbor::MinDistance;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Entries are always sorted, unique by id, and within capacity.
        #[test]
        fn prop_invariants_hold_after_any_push_sequence(
            pushes in proptest::collection::vec((0u32..50, 0.0f32..10.0), 0..120),
            capacity in 1usize..20,
        ) {
            let mut buffer = SearchBuffer::<MinDistance>::new(capacity).unwrap();
            for &(id, d) in &pushes {
                buffer.push(Neighbor::new(id, d));
            }

            prop_assert!(buffer.len() <= capacity);
            let entries = buffer.entries();
            for window in entries.windows(2) {
                prop_assert!(precedes::<MinDistance>(window[0].neighbor(), window[1].neighbor()));
            }
            let mut ids: Vec<_> = entries.iter().map(|e| e.id).collect();
            let before = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), before);
        }

        /// next_unvisited drains every resident entry exactly once when no
        /// pushes interleave.
        #[test]
        fn prop_next_unvisited_drains_in_order(
            pushes in proptest::collection::vec((0u32..40, 0.0f32..10.0), 1..40),
            capacity in 1usize..16,
        ) {
            let mut buffer = SearchBuffer::<MinDistance>::new(capacity).unwrap();
            for &(id, d) in &pushes {
                buffer.push(Neighbor::new(id, d));
            }
            let expected: Vec<_> = buffer.entries().iter().map(|e| e.id).collect();
            let mut drained = Vec::new();
            while let Some(n) = buffer.next_unvisited() {
                drained.push(n.id);
            }
            prop_assert_eq!(drained, expected);
        }
    }
}
