//! The dynamic graph index: insert, soft-delete, consolidate, compact.
//!
//! Wraps the dataset, graph, translator, and worker pool behind one type.
//! Searches share the index (`&self`); every mutation takes `&mut self`,
//! so the reader-writer discipline of the engine is the borrow checker.
//!
//! Deletes only tombstone the slot. `consolidate` repairs the graph
//! around tombstones (no live node points at a dead slot afterwards);
//! `compact` renumbers live slots densely and reclaims the storage.
//! Compact consolidates first when tombstones remain, so either calling
//! convention leaves no stale references.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::builder::{robust_prune, VamanaBuildParameters, VamanaBuilder};
use crate::compact::{build_permutation, compact_graph, compact_vectors, remap_entry_points};
use crate::data::io::{atomic_write, load_native, save_native};
use crate::data::{DenseVectors, VectorsRef};
use crate::distance::Distance;
use crate::elements::{Element, ElementKind};
use crate::error::{QuiverError, Result};
use crate::graph::AdjacencyGraph;
use crate::medoid::find_medoid;
use crate::neighbor::{DistanceOrder, Neighbor};
use crate::result::QueryResult;
use crate::search::{greedy_search, SearchBuffer, SearchScratch};
use crate::threads::{DynamicPartition, ThreadPool};
use crate::translate::IdTranslator;
use crate::version::{Version, LIBRARY_VERSION};

/// Scratch-buffer bound used when `compact` is called with batch size 0.
pub const DEFAULT_COMPACT_BATCH_SIZE: usize = 1_000_000;

const IDS_MAGIC: [u8; 4] = *b"QIDT";
const IDS_FORMAT_VERSION: u32 = 1;

const CONFIG_FILE: &str = "config.json";
const DATA_FILE: &str = "data.svs";
const GRAPH_FILE: &str = "graph.svs";
const IDS_FILE: &str = "ids.svs";

#[derive(Debug, Serialize, Deserialize)]
struct IndexConfig {
    version: String,
    element: ElementKind,
    dimensions: usize,
    parameters: VamanaBuildParameters,
    search_window_size: usize,
    entry_points: Vec<u32>,
}

/// A Vamana graph index supporting online insert and delete.
pub struct DynamicIndex<T: Element, D: Distance<T>> {
    data: DenseVectors<T>,
    graph: AdjacencyGraph,
    translator: IdTranslator,
    distance: D,
    pool: ThreadPool,
    params: VamanaBuildParameters,
    entry_points: Vec<u32>,
    search_window_size: usize,
}

impl<T: Element, D: Distance<T>> DynamicIndex<T, D> {
    /// Build an index over `data`, with `ids[i]` as the external id of
    /// slot `i`.
    ///
    /// Building over an empty dataset is an error, as is an id count that
    /// does not match the dataset or a duplicate id.
    pub fn build(
        params: VamanaBuildParameters,
        data: DenseVectors<T>,
        ids: &[u64],
        distance: D,
        num_threads: usize,
    ) -> Result<Self> {
        params.validate()?;
        if data.is_empty() {
            return Err(QuiverError::invalid_argument("cannot build an index over an empty dataset"));
        }
        if ids.len() != data.size() {
            return Err(QuiverError::invalid_argument(format!(
                "{} ids for {} vectors",
                ids.len(),
                data.size()
            )));
        }

        let pool = ThreadPool::new(num_threads)?;
        let mut translator = IdTranslator::new();
        translator.check_batch_addable(ids)?;
        for &id in ids {
            translator.add(id)?;
        }

        let mut graph = AdjacencyGraph::with_nodes(data.size(), params.graph_max_degree)?;
        let entry = find_medoid(&data, &distance, &pool, |_| true)?;
        info!("building index over {} vectors, entry point {}", data.size(), entry);

        {
            let builder = VamanaBuilder::new(&data, &params, distance.clone(), &pool)?;
            let slots: Vec<u32> = (0..data.size() as u32).collect();
            builder.insert_slots(&mut graph, &[entry], &slots, |_| true)?;
        }

        let search_window_size = params.construction_window_size;
        Ok(DynamicIndex {
            data,
            graph,
            translator,
            distance,
            pool,
            params,
            entry_points: vec![entry],
            search_window_size,
        })
    }

    /// Total slots, live and tombstoned.
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Slots that are not tombstoned.
    pub fn live_count(&self) -> usize {
        self.translator.live_count()
    }

    pub fn dimensions(&self) -> usize {
        self.data.dimensions()
    }

    /// Whether `external` names a live vector.
    pub fn has_id(&self, external: u64) -> bool {
        self.translator.has_id(external)
    }

    /// All live external ids, in slot order.
    pub fn all_ids(&self) -> Vec<u64> {
        let mut ids = Vec::with_capacity(self.translator.live_count());
        self.translator.for_each_live(|external, _| ids.push(external));
        ids
    }

    /// Visit every live external id in slot order.
    pub fn on_ids(&self, mut f: impl FnMut(u64)) {
        self.translator.for_each_live(|external, _| f(external));
    }

    pub fn get_alpha(&self) -> f32 {
        self.params.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) -> Result<()> {
        if !(alpha >= 1.0) {
            return Err(QuiverError::invalid_argument(format!("alpha must be at least 1.0, got {alpha}")));
        }
        self.params.alpha = alpha;
        Ok(())
    }

    pub fn get_construction_window_size(&self) -> usize {
        self.params.construction_window_size
    }

    pub fn set_construction_window_size(&mut self, window_size: usize) -> Result<()> {
        if window_size < self.params.graph_max_degree {
            return Err(QuiverError::invalid_argument(format!(
                "construction window {window_size} is below the graph degree {}",
                self.params.graph_max_degree
            )));
        }
        self.params.construction_window_size = window_size;
        self.params.max_candidate_pool_size = self.params.max_candidate_pool_size.max(window_size);
        Ok(())
    }

    pub fn get_search_window_size(&self) -> usize {
        self.search_window_size
    }

    /// Set the beam capacity used by queries. Must be positive; each
    /// query additionally requires it to be at least `k`.
    pub fn set_search_window_size(&mut self, window_size: usize) -> Result<()> {
        if window_size == 0 {
            return Err(QuiverError::invalid_argument("search window size must be positive"));
        }
        self.search_window_size = window_size;
        Ok(())
    }

    pub fn get_num_threads(&self) -> usize {
        self.pool.size()
    }

    /// Change the worker count; zero is silently clamped to one.
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        self.pool.resize(num_threads)
    }

    pub(crate) fn entry_points(&self) -> &[u32] {
        &self.entry_points
    }

    /// Return the `num_neighbors` approximate nearest live neighbors of
    /// every query, as `(external id, distance)` rows ordered nearest
    /// first. Tombstoned vectors never appear.
    pub fn search(&self, queries: VectorsRef<'_>, num_neighbors: usize) -> Result<QueryResult> {
        if num_neighbors == 0 {
            return Err(QuiverError::invalid_argument("num_neighbors must be positive"));
        }
        if num_neighbors > self.search_window_size {
            return Err(QuiverError::invalid_argument(format!(
                "num_neighbors ({num_neighbors}) exceeds the search window size ({})",
                self.search_window_size
            )));
        }
        if queries.dimensions() != self.data.dimensions() {
            return Err(QuiverError::invalid_argument(format!(
                "queries have {} dimensions, index has {}",
                queries.dimensions(),
                self.data.dimensions()
            )));
        }

        let num_queries = queries.len();
        let mut result = QueryResult::new(num_queries, num_neighbors, D::Order::WORST);
        if num_queries == 0 || self.entry_points.is_empty() {
            return Ok(result);
        }

        let data = &self.data;
        let graph = &self.graph;
        let translator = &self.translator;
        let entry_points = &self.entry_points;
        let window = self.search_window_size;

        let tile = num_queries.div_ceil(self.pool.size()).max(1);
        let collected: Mutex<Vec<(usize, Vec<Neighbor>)>> = Mutex::new(Vec::with_capacity(num_queries));

        self.pool.run(DynamicPartition::new(num_queries, tile), |range, _worker| {
            let mut buffer = SearchBuffer::<D::Order>::new(window)?;
            let mut scratch = SearchScratch::new(&self.distance);
            let mut local = Vec::with_capacity(range.len());
            for q in range {
                greedy_search(
                    data,
                    graph,
                    queries.get(q),
                    entry_points,
                    &mut buffer,
                    &mut scratch,
                    |slot| !translator.is_deleted(slot),
                    None,
                );
                let row: Vec<Neighbor> =
                    buffer.best_k(num_neighbors).iter().map(|e| e.neighbor()).collect();
                local.push((q, row));
            }
            collected.lock().extend(local);
            Ok(())
        })?;

        for (q, row) in collected.into_inner() {
            for (j, neighbor) in row.into_iter().enumerate() {
                let external = self.translator.external_of(neighbor.id)?;
                result.write_entry(q, j, external, neighbor.distance);
            }
        }
        Ok(result)
    }

    /// Insert a batch of vectors under new external ids.
    ///
    /// All-or-nothing: every id is validated before any state changes, so
    /// a duplicate id (in the index or within the batch) leaves the index
    /// untouched.
    pub fn insert(&mut self, ids: &[u64], vectors: VectorsRef<'_>) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(QuiverError::invalid_argument(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if vectors.dimensions() != self.data.dimensions() {
            return Err(QuiverError::invalid_argument(format!(
                "vectors have {} dimensions, index has {}",
                vectors.dimensions(),
                self.data.dimensions()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }
        self.translator.check_batch_addable(ids)?;

        let mut new_slots = Vec::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            let slot = self.translator.add(id)?;
            let data_slot = self.data.append_f32(vectors.get(i))?;
            debug_assert_eq!(slot, data_slot);
            new_slots.push(slot);
        }
        self.graph.reserve(self.data.size());

        if self.entry_points.is_empty() {
            // Everything previously indexed was deleted; restart from the
            // medoid of the live set.
            let translator = &self.translator;
            let entry = find_medoid(&self.data, &self.distance, &self.pool, |slot| {
                !translator.is_deleted(slot)
            })?;
            self.entry_points = vec![entry];
        }

        debug!("inserting {} vectors", new_slots.len());
        let builder = VamanaBuilder::new(&self.data, &self.params, self.distance.clone(), &self.pool)?;
        let translator = &self.translator;
        builder.insert_slots(&mut self.graph, &self.entry_points, &new_slots, |slot| {
            !translator.is_deleted(slot)
        })?;
        Ok(())
    }

    /// Soft-delete a batch of external ids.
    ///
    /// All-or-nothing: an unknown id (`NotFound`), an already tombstoned
    /// id (`AlreadyDeleted`), or a repeat within the batch leaves the
    /// index untouched. The graph is not repaired until
    /// [`consolidate`](DynamicIndex::consolidate).
    pub fn delete(&mut self, ids: &[u64]) -> Result<()> {
        let mut batch = HashSet::with_capacity(ids.len());
        for &id in ids {
            let slot = self.translator.slot_of(id)?;
            if self.translator.is_deleted(slot) {
                return Err(QuiverError::AlreadyDeleted(id));
            }
            if !batch.insert(id) {
                return Err(QuiverError::invalid_argument(format!(
                    "external id {id} appears twice in the batch"
                )));
            }
        }
        for &id in ids {
            self.translator.mark_deleted(id)?;
        }
        debug!("deleted {} ids ({} tombstones total)", ids.len(), self.translator.deleted_count());

        if self.translator.live_count() == 0 {
            self.entry_points.clear();
            return Ok(());
        }
        if self.entry_points.iter().any(|&e| self.translator.is_deleted(e)) {
            // Entry points must stay live; re-seat on the live medoid.
            let translator = &self.translator;
            let entry = find_medoid(&self.data, &self.distance, &self.pool, |slot| {
                !translator.is_deleted(slot)
            })?;
            self.entry_points = vec![entry];
        }
        Ok(())
    }

    /// Repair the graph around tombstones: every live node whose
    /// adjacency references a deleted slot gets a fresh neighbor list
    /// from a tombstone-excluding search plus re-pruning. Afterwards no
    /// live node references a tombstoned slot.
    pub fn consolidate(&mut self) -> Result<()> {
        if self.translator.deleted_count() == 0 {
            return Ok(());
        }

        let data = &self.data;
        let graph = &self.graph;
        let translator = &self.translator;
        let entry_points = &self.entry_points;
        let params = &self.params;
        let n = self.data.size();

        // Live nodes that reference at least one tombstone.
        let affected: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        self.pool.run(DynamicPartition::new(n, 4096), |range, _worker| {
            let mut local = Vec::new();
            for slot in range {
                let slot = slot as u32;
                if translator.is_deleted(slot) {
                    continue;
                }
                if graph.neighbors(slot).iter().any(|&m| translator.is_deleted(m)) {
                    local.push(slot);
                }
            }
            affected.lock().extend(local);
            Ok(())
        })?;
        let affected = affected.into_inner();
        if affected.is_empty() {
            return Ok(());
        }
        info!("consolidating {} nodes around {} tombstones", affected.len(), translator.deleted_count());

        // Recompute each affected node's list against the frozen graph.
        let replacements: Mutex<Vec<(u32, Vec<u32>)>> = Mutex::new(Vec::with_capacity(affected.len()));
        let affected_ref: &[u32] = &affected;

        self.pool.run(DynamicPartition::new(affected_ref.len(), 1), |range, _worker| {
            let mut buffer = SearchBuffer::<D::Order>::new(params.construction_window_size)?;
            let mut scratch = SearchScratch::new(&self.distance);
            let mut query = Vec::with_capacity(data.dimensions());
            let mut prune_query = Vec::with_capacity(data.dimensions());
            let mut trace: Vec<Neighbor> = Vec::new();
            let mut local = Vec::with_capacity(range.len());

            for at in range {
                let node = affected_ref[at];
                data.copy_to_f32(node, &mut query);
                trace.clear();
                greedy_search(
                    data,
                    graph,
                    &query,
                    entry_points,
                    &mut buffer,
                    &mut scratch,
                    |slot| slot != node && !translator.is_deleted(slot),
                    Some(&mut trace),
                );

                let mut candidates: Vec<Neighbor> =
                    Vec::with_capacity(trace.len() + buffer.len() + params.graph_max_degree);
                candidates.extend(trace.iter().copied());
                candidates.extend(buffer.entries().iter().map(|e| e.neighbor()));
                scratch.distance.fix_argument(&query);
                for &m in graph.neighbors(node) {
                    if !translator.is_deleted(m) {
                        candidates.push(Neighbor::new(m, scratch.distance.compute(&query, data.get(m))));
                    }
                }

                let list = robust_prune(
                    data,
                    &mut scratch.distance,
                    node,
                    &mut candidates,
                    params.alpha,
                    params.graph_max_degree,
                    &mut prune_query,
                );
                local.push((node, list));
            }
            replacements.lock().extend(local);
            Ok(())
        })?;

        let mut replacements = replacements.into_inner();
        replacements.sort_unstable_by_key(|(node, _)| *node);
        for (node, list) in replacements {
            self.graph.set_neighbors(node, &list)?;
        }
        Ok(())
    }

    /// Reclaim tombstoned slots by renumbering live slots densely.
    ///
    /// `batch_size` bounds the scratch buffer used to move the dataset;
    /// zero selects [`DEFAULT_COMPACT_BATCH_SIZE`]. Consolidates first
    /// when tombstones remain, so no stale references can survive. A
    /// second `compact` with no tombstones is a no-op.
    pub fn compact(&mut self, batch_size: usize) -> Result<()> {
        if self.translator.deleted_count() == 0 {
            return Ok(());
        }
        self.consolidate()?;

        let batch_size = if batch_size == 0 { DEFAULT_COMPACT_BATCH_SIZE } else { batch_size };
        let translator = &self.translator;
        let (new_to_old, old_to_new) =
            build_permutation(self.data.size(), |slot| translator.is_deleted(slot));
        info!("compacting {} slots down to {}", self.data.size(), new_to_old.len());

        compact_vectors(&mut self.data, &new_to_old, batch_size, &self.pool)?;
        self.graph = compact_graph(&self.graph, &new_to_old, &old_to_new, &self.pool)?;
        self.entry_points = remap_entry_points(&self.entry_points, &old_to_new)?;
        self.translator.apply_permutation(&new_to_old)?;
        Ok(())
    }

    /// Verify every structural invariant of the index.
    ///
    /// With `allow_deleted_references`, edges from live nodes to
    /// tombstoned slots are tolerated (the state between a delete and the
    /// next consolidation).
    pub fn debug_check_invariants(&self, allow_deleted_references: bool) -> Result<()> {
        if self.graph.n_nodes() != self.data.size() {
            return Err(QuiverError::internal(format!(
                "graph has {} nodes for {} dataset slots",
                self.graph.n_nodes(),
                self.data.size()
            )));
        }
        if self.translator.size() != self.data.size() {
            return Err(QuiverError::internal(format!(
                "translator covers {} slots of {}",
                self.translator.size(),
                self.data.size()
            )));
        }
        self.graph.check_invariants(self.data.size())?;
        self.translator.check_invariants()?;

        if self.translator.live_count() > 0 && self.entry_points.is_empty() {
            return Err(QuiverError::internal("live index without entry points"));
        }
        for &entry in &self.entry_points {
            if self.translator.is_deleted(entry) {
                return Err(QuiverError::internal(format!("entry point {entry} is tombstoned")));
            }
        }

        if !allow_deleted_references {
            for slot in 0..self.data.size() as u32 {
                if self.translator.is_deleted(slot) {
                    continue;
                }
                if let Some(&dead) =
                    self.graph.neighbors(slot).iter().find(|&&m| self.translator.is_deleted(m))
                {
                    return Err(QuiverError::internal(format!(
                        "live node {slot} references tombstoned slot {dead}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Save the index into `directory` (created if absent): a JSON
    /// configuration plus native data, graph, and id files, each written
    /// atomically.
    pub fn save(&self, directory: &Path) -> Result<()> {
        std::fs::create_dir_all(directory)?;

        let config = IndexConfig {
            version: LIBRARY_VERSION.to_string(),
            element: T::KIND,
            dimensions: self.data.dimensions(),
            parameters: self.params.clone(),
            search_window_size: self.search_window_size,
            entry_points: self.entry_points.clone(),
        };
        let config_bytes = serde_json::to_vec_pretty(&config)
            .map_err(|e| QuiverError::internal(format!("failed to encode the index config: {e}")))?;
        atomic_write(&directory.join(CONFIG_FILE), &config_bytes)?;

        save_native(&self.data, &directory.join(DATA_FILE))?;
        self.graph.save(&directory.join(GRAPH_FILE))?;
        self.save_ids(&directory.join(IDS_FILE))?;
        info!("saved index ({} slots) to {}", self.data.size(), directory.display());
        Ok(())
    }

    fn save_ids(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(16 + self.translator.size() * 9);
        bytes.extend_from_slice(&IDS_MAGIC);
        bytes.extend_from_slice(&IDS_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.translator.size() as u64).to_le_bytes());
        for (external, deleted) in self.translator.slots() {
            bytes.extend_from_slice(&external.to_le_bytes());
            bytes.push(u8::from(deleted));
        }
        atomic_write(path, &bytes)
    }

    fn load_ids(path: &Path) -> Result<IdTranslator> {
        let raw = std::fs::read(path)?;
        if raw.len() < 16 || raw[0..4] != IDS_MAGIC {
            return Err(QuiverError::malformed(format!("{} is not an id table", path.display())));
        }
        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != IDS_FORMAT_VERSION {
            return Err(QuiverError::malformed(format!(
                "{} has id table version {version}, this build reads {IDS_FORMAT_VERSION}",
                path.display()
            )));
        }
        let n = u64::from_le_bytes([
            raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
        ]) as usize;
        if raw.len() != 16 + n * 9 {
            return Err(QuiverError::malformed(format!("{} is truncated", path.display())));
        }
        let mut slots = Vec::with_capacity(n);
        for record in raw[16..].chunks_exact(9) {
            let external = u64::from_le_bytes([
                record[0], record[1], record[2], record[3], record[4], record[5], record[6],
                record[7],
            ]);
            slots.push((external, record[8] != 0));
        }
        IdTranslator::from_slots(slots)
    }

    /// Load an index previously written by [`save`](DynamicIndex::save).
    ///
    /// `distance` must be the functor the index was built with; the
    /// stored element kind must match `T`.
    pub fn load(directory: &Path, distance: D, num_threads: usize) -> Result<Self> {
        let config_raw = std::fs::read(directory.join(CONFIG_FILE))?;
        let config: IndexConfig = serde_json::from_slice(&config_raw)
            .map_err(|e| QuiverError::malformed(format!("unreadable index config: {e}")))?;

        let saved_version = Version::parse(&config.version)?;
        if saved_version > LIBRARY_VERSION {
            return Err(QuiverError::InvalidState(format!(
                "index was saved by {saved_version}, this library is {LIBRARY_VERSION}"
            )));
        }
        if config.element != T::KIND {
            return Err(QuiverError::invalid_argument(format!(
                "index stores {} elements, caller requested {}",
                config.element,
                T::KIND
            )));
        }
        config.parameters.validate()?;

        let data: DenseVectors<T> = load_native(&directory.join(DATA_FILE))?;
        let graph = AdjacencyGraph::load(&directory.join(GRAPH_FILE))?;
        let translator = Self::load_ids(&directory.join(IDS_FILE))?;

        if data.dimensions() != config.dimensions {
            return Err(QuiverError::malformed(format!(
                "config promises {} dimensions, data file holds {}",
                config.dimensions,
                data.dimensions()
            )));
        }
        if graph.n_nodes() != data.size() || translator.size() != data.size() {
            return Err(QuiverError::malformed(format!(
                "inconsistent index files: {} vectors, {} graph nodes, {} id slots",
                data.size(),
                graph.n_nodes(),
                translator.size()
            )));
        }
        if graph.max_degree() != config.parameters.graph_max_degree {
            return Err(QuiverError::malformed(format!(
                "config promises degree {}, graph file holds {}",
                config.parameters.graph_max_degree,
                graph.max_degree()
            )));
        }

        let index = DynamicIndex {
            data,
            graph,
            translator,
            distance,
            pool: ThreadPool::new(num_threads)?,
            params: config.parameters,
            entry_points: config.entry_points,
            search_window_size: config.search_window_size,
        };
        index.debug_check_invariants(true)?;
        info!("loaded index ({} slots) from {}", index.size(), directory.display());
        Ok(index)
    }
}
