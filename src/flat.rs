//! Exact (exhaustive) nearest-neighbor search.
//!
//! The flat index compares every query against every dataset element, so
//! its results are ground truth for the graph index (up to floating-point
//! error). The scan is tiled: the dataset is walked in large contiguous
//! chunks, and within each chunk workers pull query tiles dynamically.
//! Each stored vector is loaded once per query tile and measured against
//! every query in it, which amortizes the memory traffic that dominates
//! exhaustive search.

use log::debug;

use crate::data::{DenseVectors, VectorsRef};
use crate::distance::{BroadcastDistance, Distance};
use crate::elements::Element;
use crate::error::{QuiverError, Result};
use crate::neighbor::{DistanceOrder, Neighbor};
use crate::result::QueryResult;
use crate::sorter::BulkSorter;
use crate::threads::{DynamicPartition, ThreadPool};

/// Dataset tile size used when the caller leaves `data_batch_size` at 0.
pub const DEFAULT_DATA_BATCH_SIZE: usize = 100_000;

/// Exhaustive search over a dense dataset.
pub struct FlatIndex<T: Element, D: Distance<T>> {
    data: DenseVectors<T>,
    distance: D,
    pool: ThreadPool,
    data_batch_size: usize,
    query_batch_size: usize,
}

impl<T: Element, D: Distance<T>> FlatIndex<T, D> {
    /// Build a flat index over `data` using `num_threads` workers
    /// (zero clamps to one).
    pub fn new(data: DenseVectors<T>, distance: D, num_threads: usize) -> Result<Self> {
        Ok(FlatIndex {
            data,
            distance,
            pool: ThreadPool::new(num_threads)?,
            data_batch_size: 0,
            query_batch_size: 0,
        })
    }

    /// Number of indexed vectors.
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Components per vector.
    pub fn dimensions(&self) -> usize {
        self.data.dimensions()
    }

    /// Borrow the underlying dataset.
    pub fn data(&self) -> &DenseVectors<T> {
        &self.data
    }

    /// Current worker count.
    pub fn get_num_threads(&self) -> usize {
        self.pool.size()
    }

    /// Change the worker count; zero is silently clamped to one.
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        self.pool.resize(num_threads)
    }

    pub fn get_data_batch_size(&self) -> usize {
        self.data_batch_size
    }

    /// Dataset tile size; 0 restores the default, larger values are
    /// clamped to the dataset size at query time.
    pub fn set_data_batch_size(&mut self, data_batch_size: usize) {
        self.data_batch_size = data_batch_size;
    }

    pub fn get_query_batch_size(&self) -> usize {
        self.query_batch_size
    }

    /// Query tile size; 0 divides the queries evenly over the workers.
    pub fn set_query_batch_size(&mut self, query_batch_size: usize) {
        self.query_batch_size = query_batch_size;
    }

    fn compute_data_batch_size(&self) -> usize {
        if self.data_batch_size == 0 {
            DEFAULT_DATA_BATCH_SIZE.min(self.data.size()).max(1)
        } else {
            self.data_batch_size.min(self.data.size()).max(1)
        }
    }

    fn compute_query_batch_size(&self, num_queries: usize) -> usize {
        if self.query_batch_size == 0 {
            num_queries.div_ceil(self.pool.size()).max(1)
        } else {
            self.query_batch_size
        }
    }

    /// Return the `num_neighbors` exact nearest neighbors of every query.
    ///
    /// Row `i` of the result corresponds to query `i`, ordered nearest
    /// first with ties broken by ascending slot id. Ids are slot indices
    /// widened to `u64`.
    pub fn search(&self, queries: VectorsRef<'_>, num_neighbors: usize) -> Result<QueryResult> {
        self.search_with_predicate(queries, num_neighbors, |_| true)
    }

    /// [`search`](FlatIndex::search) restricted to slots accepted by
    /// `predicate`, which must be pure and cheap: it runs once per
    /// (slot, query tile).
    pub fn search_with_predicate<P>(
        &self,
        queries: VectorsRef<'_>,
        num_neighbors: usize,
        predicate: P,
    ) -> Result<QueryResult>
    where
        P: Fn(u32) -> bool + Sync,
    {
        if num_neighbors == 0 {
            return Err(QuiverError::invalid_argument("num_neighbors must be positive"));
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
        if num_queries == 0 || self.data.is_empty() {
            return Ok(result);
        }

        let mut sorter = BulkSorter::<D::Order>::new(num_queries, num_neighbors)?;
        sorter.prepare();

        let data_batch_size = self.compute_data_batch_size();
        let query_batch_size = self.compute_query_batch_size(num_queries);
        debug!(
            "flat search: {} queries x {} vectors, data tile {}, query tile {}",
            num_queries,
            self.data.size(),
            data_batch_size,
            query_batch_size
        );

        let mut start = 0usize;
        while start < self.data.size() {
            let stop = (start + data_batch_size).min(self.data.size());
            self.search_subset(queries, start..stop, query_batch_size, &sorter, &predicate)?;
            start = stop;
        }

        for (q, row) in sorter.cleanup().into_iter().enumerate() {
            for (j, neighbor) in row.into_iter().enumerate() {
                result.write_entry(q, j, neighbor.id as u64, neighbor.distance);
            }
        }
        Ok(result)
    }

    // One dataset tile: workers pull query tiles until the tile is done.
    fn search_subset<P>(
        &self,
        queries: VectorsRef<'_>,
        data_range: std::ops::Range<usize>,
        query_batch_size: usize,
        sorter: &BulkSorter<D::Order>,
        predicate: &P,
    ) -> Result<()>
    where
        P: Fn(u32) -> bool + Sync,
    {
        self.pool.run(DynamicPartition::new(queries.len(), query_batch_size), |query_range, _worker| {
            let mut functors = BroadcastDistance::new(&self.distance, query_range.len());
            for (i, q) in query_range.clone().enumerate() {
                functors[i].fix_argument(queries.get(q));
            }

            let mut rows = Vec::with_capacity(query_range.len());
            for q in query_range.clone() {
                rows.push(sorter.row(q)?);
            }

            for slot in data_range.clone() {
                let slot = slot as u32;
                if !predicate(slot) {
                    continue;
                }
                if (slot as usize) + 1 < data_range.end {
                    self.data.prefetch(slot + 1);
                }
                let datum = self.data.get(slot);
                for (i, q) in query_range.clone().enumerate() {
                    let d = functors[i].compute(queries.get(q), datum);
                    rows[i].insert(Neighbor::new(slot, d));
                }
            }
            Ok(())
        })
    }

}
