//! Per-search visited tracking.

/// Generation-stamped visited set over slot indices.
///
/// `clear` bumps a generation counter instead of zeroing the array, so a
/// worker can reuse one instance across thousands of queries; the full
/// memset happens only when the counter wraps.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u32>,
    generation: u32,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        VisitedSet { stamps: vec![0; capacity], generation: 1 }
    }

    /// Forget all visits. O(1) amortized.
    pub fn clear(&mut self) {
        if self.generation == u32::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grow to cover at least `capacity` slots.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
    }

    /// Mark `slot` visited. Returns `true` if it was not already visited.
    #[inline]
    pub fn insert(&mut self, slot: u32) -> bool {
        let stamp = &mut self.stamps[slot as usize];
        if *stamp == self.generation {
            false
        } else {
            *stamp = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, slot: u32) -> bool {
        self.stamps[slot as usize] == self.generation
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        VisitedSet::new(0)
    }
}
