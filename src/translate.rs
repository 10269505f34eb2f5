//! External-id translation and soft deletes.
//!
//! Clients address vectors by 64-bit external ids; the engine works in
//! dense slot indices. The translator keeps both directions consistent
//! and tracks which slots are tombstoned. It is a bijection on live
//! slots; tombstoned slots keep their mapping (so a double delete can be
//! distinguished from an unknown id) until compaction rebuilds the maps.

use std::collections::HashMap;

use crate::error::{QuiverError, Result};

/// Bijective external-id / slot mapping with tombstones.
#[derive(Debug, Clone, Default)]
pub struct IdTranslator {
    to_slot: HashMap<u64, u32>,
    to_external: Vec<u64>,
    deleted: Vec<bool>,
    deleted_count: usize,
}

impl IdTranslator {
    pub fn new() -> Self {
        IdTranslator::default()
    }

    /// Total slots, live and tombstoned.
    #[inline]
    pub fn size(&self) -> usize {
        self.to_external.len()
    }

    /// Slots not tombstoned.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.to_external.len() - self.deleted_count
    }

    /// Tombstoned slots.
    #[inline]
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    /// Whether `external` maps to a live slot.
    pub fn has_id(&self, external: u64) -> bool {
        self.to_slot.get(&external).is_some_and(|&slot| !self.deleted[slot as usize])
    }

    /// Register a new external id on the next slot.
    ///
    /// Fails with `InvalidArgument` when the id is already present,
    /// live or tombstoned.
    pub fn add(&mut self, external: u64) -> Result<u32> {
        if self.to_slot.contains_key(&external) {
            return Err(QuiverError::invalid_argument(format!("duplicate external id {external}")));
        }
        let slot = self.to_external.len();
        if slot > u32::MAX as usize {
            return Err(QuiverError::invalid_argument("translator exceeds the u32 slot space"));
        }
        self.to_slot.insert(external, slot as u32);
        self.to_external.push(external);
        self.deleted.push(false);
        Ok(slot as u32)
    }

    /// Validate that a batch of ids could all be added: no id already
    /// present, no duplicate within the batch. Nothing is mutated.
    pub fn check_batch_addable(&self, externals: &[u64]) -> Result<()> {
        let mut batch = std::collections::HashSet::with_capacity(externals.len());
        for &external in externals {
            if self.to_slot.contains_key(&external) {
                return Err(QuiverError::invalid_argument(format!("duplicate external id {external}")));
            }
            if !batch.insert(external) {
                return Err(QuiverError::invalid_argument(format!(
                    "external id {external} appears twice in the batch"
                )));
            }
        }
        if self.to_external.len() + externals.len() > u32::MAX as usize {
            return Err(QuiverError::invalid_argument("translator exceeds the u32 slot space"));
        }
        Ok(())
    }

    /// Slot of `external`, live or tombstoned.
    pub fn slot_of(&self, external: u64) -> Result<u32> {
        self.to_slot.get(&external).copied().ok_or(QuiverError::NotFound(external))
    }

    /// External id of `slot`.
    pub fn external_of(&self, slot: u32) -> Result<u64> {
        self.to_external.get(slot as usize).copied().ok_or_else(|| {
            QuiverError::internal(format!("slot {slot} has no external id"))
        })
    }

    /// Tombstone `external`'s slot. Returns the slot.
    pub fn mark_deleted(&mut self, external: u64) -> Result<u32> {
        let slot = self.slot_of(external)?;
        let flag = &mut self.deleted[slot as usize];
        if *flag {
            return Err(QuiverError::AlreadyDeleted(external));
        }
        *flag = true;
        self.deleted_count += 1;
        Ok(slot)
    }

    /// Whether `slot` is tombstoned.
    #[inline]
    pub fn is_deleted(&self, slot: u32) -> bool {
        self.deleted[slot as usize]
    }

    /// Visit every live `(external, slot)` pair in ascending slot order.
    pub fn for_each_live(&self, mut f: impl FnMut(u64, u32)) {
        for (slot, &external) in self.to_external.iter().enumerate() {
            if !self.deleted[slot] {
                f(external, slot as u32);
            }
        }
    }

    /// Rebuild the maps after compaction. `new_to_old[new]` names the
    /// surviving slot previously at `old`; all survivors are live.
    pub fn apply_permutation(&mut self, new_to_old: &[u32]) -> Result<()> {
        let mut to_external = Vec::with_capacity(new_to_old.len());
        let mut to_slot = HashMap::with_capacity(new_to_old.len());
        for (new_slot, &old_slot) in new_to_old.iter().enumerate() {
            let external = self.external_of(old_slot)?;
            if self.deleted[old_slot as usize] {
                return Err(QuiverError::internal(format!(
                    "compaction kept tombstoned slot {old_slot}"
                )));
            }
            to_external.push(external);
            to_slot.insert(external, new_slot as u32);
        }
        self.to_external = to_external;
        self.to_slot = to_slot;
        self.deleted = vec![false; new_to_old.len()];
        self.deleted_count = 0;
        Ok(())
    }

    /// Verify the bijection and the live/tombstone bookkeeping.
    pub fn check_invariants(&self) -> Result<()> {
        if self.to_slot.len() != self.to_external.len() {
            return Err(QuiverError::internal(format!(
                "{} forward entries for {} slots",
                self.to_slot.len(),
                self.to_external.len()
            )));
        }
        if self.deleted.len() != self.to_external.len() {
            return Err(QuiverError::internal("tombstone flags out of step with slots"));
        }
        let counted = self.deleted.iter().filter(|&&d| d).count();
        if counted != self.deleted_count {
            return Err(QuiverError::internal(format!(
                "tombstone count {} does not match flags {}",
                self.deleted_count, counted
            )));
        }
        for (slot, &external) in self.to_external.iter().enumerate() {
            match self.to_slot.get(&external) {
                Some(&mapped) if mapped as usize == slot => {}
                _ => {
                    return Err(QuiverError::internal(format!(
                        "slot {slot} and external {external} disagree"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Raw per-slot state for persistence: `(external, deleted)` in slot
    /// order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = (u64, bool)> + '_ {
        self.to_external.iter().zip(&self.deleted).map(|(&e, &d)| (e, d))
    }

    /// Rebuild from persisted per-slot state.
    pub(crate) fn from_slots(slots: impl IntoIterator<Item = (u64, bool)>) -> Result<Self> {
        let mut translator = IdTranslator::new();
        for (external, deleted) in slots {
            translator.add(external)?;
            if deleted {
                translator.mark_deleted(external)?;
            }
        }
        Ok(translator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup_both_directions() {
        let mut translator = IdTranslator::new();
        assert_eq!(translator.add(100).unwrap(), 0);
        assert_eq!(translator.add(200).unwrap(), 1);

        assert_eq!(translator.slot_of(200).unwrap(), 1);
        assert_eq!(translator.external_of(0).unwrap(), 100);
        assert!(translator.has_id(100));
        assert!(!translator.has_id(999));
        assert!(matches!(translator.slot_of(999), Err(QuiverError::NotFound(999))));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut translator = IdTranslator::new();
        translator.add(7).unwrap();
        assert!(matches!(translator.add(7), Err(QuiverError::InvalidArgument(_))));

        assert!(translator.check_batch_addable(&[8, 9]).is_ok());
        assert!(translator.check_batch_addable(&[8, 7]).is_err());
        assert!(translator.check_batch_addable(&[8, 8]).is_err());
    }

    #[test]
    fn delete_lifecycle() {
        let mut translator = IdTranslator::new();
        translator.add(1).unwrap();
        translator.add(2).unwrap();

        assert_eq!(translator.mark_deleted(1).unwrap(), 0);
        assert!(translator.is_deleted(0));
        assert!(!translator.has_id(1));
        assert_eq!(translator.live_count(), 1);
        assert_eq!(translator.deleted_count(), 1);

        // Second delete is AlreadyDeleted, not NotFound.
        assert!(matches!(translator.mark_deleted(1), Err(QuiverError::AlreadyDeleted(1))));
        // State is unchanged by the failed call.
        assert_eq!(translator.deleted_count(), 1);
        assert!(matches!(translator.mark_deleted(99), Err(QuiverError::NotFound(99))));
    }

    #[test]
    fn deleted_ids_cannot_be_reused_before_compaction() {
        let mut translator = IdTranslator::new();
        translator.add(5).unwrap();
        translator.mark_deleted(5).unwrap();
        assert!(matches!(translator.add(5), Err(QuiverError::InvalidArgument(_))));
    }

    #[test]
    fn permutation_rebuilds_a_live_bijection() {
        let mut translator = IdTranslator::new();
        for external in [10, 20, 30, 40] {
            translator.add(external).unwrap();
        }
        translator.mark_deleted(20).unwrap();

        // Survivors in old-slot order: 0, 2, 3.
        translator.apply_permutation(&[0, 2, 3]).unwrap();
        translator.check_invariants().unwrap();

        assert_eq!(translator.size(), 3);
        assert_eq!(translator.live_count(), 3);
        assert_eq!(translator.slot_of(30).unwrap(), 1);
        assert_eq!(translator.external_of(2).unwrap(), 40);
        assert!(!translator.has_id(20));
    }

    #[test]
    fn live_iteration_follows_slot_order() {
        let mut translator = IdTranslator::new();
        for external in [9, 8, 7] {
            translator.add(external).unwrap();
        }
        translator.mark_deleted(8).unwrap();

        let mut seen = Vec::new();
        translator.for_each_live(|external, slot| seen.push((external, slot)));
        assert_eq!(seen, vec![(9, 0), (7, 2)]);
    }

    #[test]
    fn persistence_round_trip() {
        let mut translator = IdTranslator::new();
        for external in [3, 1, 4, 1_000_000] {
            translator.add(external).unwrap();
        }
        translator.mark_deleted(4).unwrap();

        let slots: Vec<_> = translator.slots().collect();
        let rebuilt = IdTranslator::from_slots(slots).unwrap();
        rebuilt.check_invariants().unwrap();
        assert_eq!(rebuilt.size(), 4);
        assert_eq!(rebuilt.deleted_count(), 1);
        assert!(rebuilt.is_deleted(2));
        assert_eq!(rebuilt.slot_of(1_000_000).unwrap(), 3);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Deleting is idempotent in effect: the second call fails and
        /// changes nothing.
        #[test]
        fn prop_double_delete_fails_cleanly(ids in proptest::collection::hash_set(0u64..1000, 1..30)) {
            let mut translator = IdTranslator::new();
            let ids: Vec<u64> = ids.into_iter().collect();
            for &id in &ids {
                translator.add(id).unwrap();
            }
            let victim = ids[0];
            translator.mark_deleted(victim).unwrap();
            let count = translator.deleted_count();
            prop_assert!(matches!(translator.mark_deleted(victim), Err(QuiverError::AlreadyDeleted(_))));
            prop_assert_eq!(translator.deleted_count(), count);
            translator.check_invariants().unwrap();
        }

        /// live + tombstoned always equals the slot count.
        #[test]
        fn prop_counts_partition_slots(
            ids in proptest::collection::hash_set(0u64..500, 1..40),
            delete_mask in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let mut translator = IdTranslator::new();
            let ids: Vec<u64> = ids.into_iter().collect();
            for &id in &ids {
                translator.add(id).unwrap();
            }
            for (i, &id) in ids.iter().enumerate() {
                if delete_mask[i % delete_mask.len()] {
                    translator.mark_deleted(id).unwrap();
                }
            }
            prop_assert_eq!(translator.live_count() + translator.deleted_count(), translator.size());
            translator.check_invariants().unwrap();
        }

        /// Compaction preserves the relative order of live slots.
        #[test]
        fn prop_permutation_preserves_live_order(
            ids in proptest::collection::hash_set(0u64..500, 2..40),
            deletions in proptest::collection::vec(any::<proptest::sample::Index>(), 0..10),
        ) {
            let mut translator = IdTranslator::new();
            let ids: Vec<u64> = ids.into_iter().collect();
            for &id in &ids {
                translator.add(id).unwrap();
            }
            for index in &deletions {
                let id = ids[index.index(ids.len())];
                let _ = translator.mark_deleted(id);
            }

            let mut live_before = Vec::new();
            translator.for_each_live(|external, _| live_before.push(external));

            let new_to_old: Vec<u32> = (0..translator.size() as u32)
                .filter(|&slot| !translator.is_deleted(slot))
                .collect();
            translator.apply_permutation(&new_to_old).unwrap();
            translator.check_invariants().unwrap();

            let mut live_after = Vec::new();
            translator.for_each_live(|external, _| live_after.push(external));
            prop_assert_eq!(live_before, live_after);
        }
    }
}
