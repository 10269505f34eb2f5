//! Vamana graph construction.
//!
//! Nodes are inserted in windows. For each window, workers search the
//! current graph for candidates in parallel (a capacity-L beam whose
//! expansion trace is kept), prune them with the robust rule, and the new
//! neighbor lists are applied in slot order. Backedges are then grouped by
//! destination; destinations that would exceed the degree bound are
//! re-pruned (in parallel against the already-updated graph) and every
//! list write happens in ascending destination order. The degree bound
//! holds at every quiescent point.

use std::collections::BTreeMap;
use std::ops::Range;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::data::DenseVectors;
use crate::distance::Distance;
use crate::elements::Element;
use crate::error::{QuiverError, Result};
use crate::graph::AdjacencyGraph;
use crate::neighbor::{compare, DistanceOrder, Neighbor};
use crate::search::{greedy_search, SearchBuffer, SearchScratch};
use crate::threads::{DynamicPartition, ThreadPool};

/// Parameters controlling graph construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VamanaBuildParameters {
    /// Prune relaxation factor; 1.0 keeps only the tightest neighbors,
    /// larger values keep more diverse edges.
    pub alpha: f32,
    /// Maximum out-degree (R).
    pub graph_max_degree: usize,
    /// Beam capacity during candidate search (L). Must be at least R.
    pub construction_window_size: usize,
    /// Cap on the candidate pool fed to the pruner.
    pub max_candidate_pool_size: usize,
    /// Number of slots inserted per parallel window.
    pub insertion_batch_size: usize,
}

impl Default for VamanaBuildParameters {
    fn default() -> Self {
        VamanaBuildParameters {
            alpha: 1.2,
            graph_max_degree: 64,
            construction_window_size: 128,
            max_candidate_pool_size: 1000,
            insertion_batch_size: 64,
        }
    }
}

impl VamanaBuildParameters {
    /// Check the parameter domains from the configuration contract.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha >= 1.0) {
            return Err(QuiverError::invalid_argument(format!(
                "alpha must be at least 1.0, got {}",
                self.alpha
            )));
        }
        if self.graph_max_degree == 0 {
            return Err(QuiverError::invalid_argument("graph_max_degree must be positive"));
        }
        if self.construction_window_size < self.graph_max_degree {
            return Err(QuiverError::invalid_argument(format!(
                "construction_window_size ({}) must be at least graph_max_degree ({})",
                self.construction_window_size, self.graph_max_degree
            )));
        }
        if self.max_candidate_pool_size < self.construction_window_size {
            return Err(QuiverError::invalid_argument(format!(
                "max_candidate_pool_size ({}) must be at least construction_window_size ({})",
                self.max_candidate_pool_size, self.construction_window_size
            )));
        }
        if self.insertion_batch_size == 0 {
            return Err(QuiverError::invalid_argument("insertion_batch_size must be positive"));
        }
        Ok(())
    }
}

/// Robust pruning: keep the closest candidate, drop everything it covers,
/// repeat until `max_degree` neighbors are chosen or the pool is empty.
///
/// `candidates` are neighbors of `node` with distances measured from
/// `node`; order and duplicates are handled here. A remaining candidate
/// `q` is covered by a chosen `p` when `alpha * d(p, q)` ranks closer
/// than `d(node, q)`.
pub(crate) fn robust_prune<T, D>(
    data: &DenseVectors<T>,
    distance: &mut D,
    node: u32,
    candidates: &mut Vec<Neighbor>,
    alpha: f32,
    max_degree: usize,
    query_scratch: &mut Vec<f32>,
) -> Vec<u32>
where
    T: Element,
    D: Distance<T>,
{
    candidates.retain(|c| c.id != node);
    candidates.sort_unstable_by(|a, b| compare::<D::Order>(*a, *b));
    candidates.dedup_by_key(|c| c.id);

    let mut chosen: Vec<u32> = Vec::with_capacity(max_degree);
    let mut covered = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if covered[i] {
            continue;
        }
        let p = candidates[i];
        chosen.push(p.id);
        if chosen.len() == max_degree {
            break;
        }

        data.copy_to_f32(p.id, query_scratch);
        distance.fix_argument(query_scratch);
        for (j, q) in candidates.iter().enumerate().skip(i + 1) {
            if covered[j] {
                continue;
            }
            let d_pq = distance.compute(query_scratch, data.get(q.id));
            if D::Order::closer(alpha * d_pq, q.distance) {
                covered[j] = true;
            }
        }
    }
    chosen
}

/// Windowed Vamana insertion over a shared dataset and graph.
pub struct VamanaBuilder<'a, T: Element, D: Distance<T>> {
    data: &'a DenseVectors<T>,
    params: &'a VamanaBuildParameters,
    distance: D,
    pool: &'a ThreadPool,
}

impl<'a, T: Element, D: Distance<T>> VamanaBuilder<'a, T, D> {
    pub fn new(
        data: &'a DenseVectors<T>,
        params: &'a VamanaBuildParameters,
        distance: D,
        pool: &'a ThreadPool,
    ) -> Result<Self> {
        params.validate()?;
        Ok(VamanaBuilder { data, params, distance, pool })
    }

    /// Insert `slots` into the graph, searching from `entry_points`.
    ///
    /// Slots already present in the graph keep their in-edges; their
    /// out-lists are recomputed. `predicate` bounds the candidate space
    /// (the dynamic index passes its live-slot filter).
    pub fn insert_slots<P>(
        &self,
        graph: &mut AdjacencyGraph,
        entry_points: &[u32],
        slots: &[u32],
        predicate: P,
    ) -> Result<()>
    where
        P: Fn(u32) -> bool + Sync,
    {
        for window in slots.chunks(self.params.insertion_batch_size) {
            self.insert_window(graph, entry_points, window, &predicate)?;
        }
        Ok(())
    }

    fn insert_window<P>(
        &self,
        graph: &mut AdjacencyGraph,
        entry_points: &[u32],
        window: &[u32],
        predicate: &P,
    ) -> Result<()>
    where
        P: Fn(u32) -> bool + Sync,
    {
        // Phase 1: search and prune in parallel against the frozen graph.
        let pruned = self.prune_window(graph, entry_points, window, predicate)?;

        // Phase 2: apply the window's lists in slot order.
        let mut ordered: Vec<&(u32, Vec<u32>)> = pruned.iter().collect();
        ordered.sort_unstable_by_key(|(slot, _)| *slot);
        for (slot, neighbors) in &ordered {
            graph.set_neighbors(*slot, neighbors)?;
        }

        // Phase 3: backedges, grouped per destination in ascending order.
        let mut pending: BTreeMap<u32, SmallVec<[u32; 8]>> = BTreeMap::new();
        for (slot, neighbors) in &ordered {
            for &destination in neighbors.iter() {
                pending.entry(destination).or_default().push(*slot);
            }
        }
        self.apply_backedges(graph, pending)?;

        debug!("built window of {} slots", window.len());
        Ok(())
    }

    // Candidate search + robust prune for every slot in the window.
    fn prune_window<P>(
        &self,
        graph: &AdjacencyGraph,
        entry_points: &[u32],
        window: &[u32],
        predicate: &P,
    ) -> Result<Vec<(u32, Vec<u32>)>>
    where
        P: Fn(u32) -> bool + Sync,
    {
        let results: Mutex<Vec<(u32, Vec<u32>)>> = Mutex::new(Vec::with_capacity(window.len()));

        self.pool.run(DynamicPartition::new(window.len(), 1), |range: Range<usize>, _worker| {
            let mut buffer = SearchBuffer::<D::Order>::new(self.params.construction_window_size)?;
            let mut scratch = SearchScratch::new(&self.distance);
            let mut query = Vec::with_capacity(self.data.dimensions());
            let mut prune_query = Vec::with_capacity(self.data.dimensions());
            let mut trace: Vec<Neighbor> = Vec::new();
            let mut local: Vec<(u32, Vec<u32>)> = Vec::with_capacity(range.len());

            for at in range {
                let slot = window[at];
                self.data.copy_to_f32(slot, &mut query);
                trace.clear();
                greedy_search(
                    self.data,
                    graph,
                    &query,
                    entry_points,
                    &mut buffer,
                    &mut scratch,
                    |candidate| candidate != slot && predicate(candidate),
                    Some(&mut trace),
                );

                // Candidate pool: every node touched by the search plus the
                // slot's current out-neighbors.
                let mut candidates: Vec<Neighbor> = Vec::with_capacity(
                    trace.len() + buffer.len() + graph.neighbors(slot).len(),
                );
                candidates.extend(trace.iter().copied());
                candidates.extend(buffer.entries().iter().map(|e| e.neighbor()));
                scratch.distance.fix_argument(&query);
                for &m in graph.neighbors(slot) {
                    if predicate(m) {
                        let d = scratch.distance.compute(&query, self.data.get(m));
                        candidates.push(Neighbor::new(m, d));
                    }
                }
                if candidates.len() > self.params.max_candidate_pool_size {
                    candidates.sort_unstable_by(|a, b| compare::<D::Order>(*a, *b));
                    candidates.truncate(self.params.max_candidate_pool_size);
                }

                let neighbors = robust_prune(
                    self.data,
                    &mut scratch.distance,
                    slot,
                    &mut candidates,
                    self.params.alpha,
                    self.params.graph_max_degree,
                    &mut prune_query,
                );
                local.push((slot, neighbors));
            }

            results.lock().extend(local);
            Ok(())
        })?;

        Ok(results.into_inner())
    }

    // Add `source -> destination` backedges; destinations that overflow
    // the degree bound are re-pruned with their sources included.
    fn apply_backedges(
        &self,
        graph: &mut AdjacencyGraph,
        pending: BTreeMap<u32, SmallVec<[u32; 8]>>,
    ) -> Result<()> {
        let max_degree = self.params.graph_max_degree;
        let mut overflowing: Vec<(u32, SmallVec<[u32; 8]>)> = Vec::new();

        for (destination, sources) in pending {
            let current = graph.neighbors(destination);
            let mut merged: SmallVec<[u32; 64]> = SmallVec::from_slice(current);
            for &source in &sources {
                if source != destination && !merged.contains(&source) {
                    merged.push(source);
                }
            }
            if merged.len() <= max_degree {
                graph.set_neighbors(destination, &merged)?;
            } else {
                overflowing.push((destination, sources));
            }
        }
        if overflowing.is_empty() {
            return Ok(());
        }

        // Re-prune overflowing destinations in parallel against the graph
        // as updated so far, then apply in ascending destination order.
        let replacements: Mutex<Vec<(u32, Vec<u32>)>> = Mutex::new(Vec::with_capacity(overflowing.len()));
        let graph_ref: &AdjacencyGraph = graph;
        let overflow_ref: &[(u32, SmallVec<[u32; 8]>)] = &overflowing;

        self.pool.run(DynamicPartition::new(overflow_ref.len(), 1), |range, _worker| {
            let mut distance = self.distance.clone();
            let mut query = Vec::with_capacity(self.data.dimensions());
            let mut prune_query = Vec::with_capacity(self.data.dimensions());
            let mut local = Vec::with_capacity(range.len());

            for at in range {
                let (destination, sources) = &overflow_ref[at];
                self.data.copy_to_f32(*destination, &mut query);
                distance.fix_argument(&query);

                let mut pool: Vec<Neighbor> = Vec::with_capacity(graph_ref.neighbors(*destination).len() + sources.len());
                for &m in graph_ref.neighbors(*destination) {
                    pool.push(Neighbor::new(m, distance.compute(&query, self.data.get(m))));
                }
                for &source in sources.iter() {
                    pool.push(Neighbor::new(source, distance.compute(&query, self.data.get(source))));
                }

                let neighbors = robust_prune(
                    self.data,
                    &mut distance,
                    *destination,
                    &mut pool,
                    self.params.alpha,
                    max_degree,
                    &mut prune_query,
                );
                local.push((*destination, neighbors));
            }
            replacements.lock().extend(local);
            Ok(())
        })?;

        let mut replacements = replacements.into_inner();
        replacements.sort_unstable_by_key(|(destination, _)| *destination);
        for (destination, neighbors) in replacements {
            graph.set_neighbors(destination, &neighbors)?;
        }
        Ok(())
    }
}
