//! Worker pool and range partitioners.
//!
//! The engine performs all parallel work on a fixed-size pool. A call to
//! [`ThreadPool::run`] hands every worker the same task closure plus a
//! [`Partition`] describing which index ranges that worker should process,
//! and blocks until the whole range is done. Two partitioning policies:
//!
//! * [`StaticPartition`] — `[0, len)` split into one contiguous block per
//!   worker, block `i` to worker `i`.
//! * [`DynamicPartition`] — fixed-size tiles pulled from a shared counter
//!   until exhausted.
//!
//! Errors returned by any worker stop the distribution of further tiles;
//! the remaining workers finish, and the first captured error is returned
//! from `run`.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{QuiverError, Result};

/// Shared per-`run` cursor for tile-pulling partitions.
pub struct PartitionState {
    next: AtomicUsize,
}

impl PartitionState {
    fn new() -> Self {
        PartitionState { next: AtomicUsize::new(0) }
    }
}

/// A policy for splitting `[0, len)` across workers.
pub trait Partition: Sync {
    /// Total number of indices covered.
    fn len(&self) -> usize;

    /// Feed `consume` the ranges assigned to `worker`; stop early if it
    /// returns `false`.
    fn drive(
        &self,
        state: &PartitionState,
        worker: usize,
        workers: usize,
        consume: &mut dyn FnMut(Range<usize>) -> bool,
    );
}

/// Contiguous per-worker blocks. With `len = 10` and four workers the
/// blocks are `[0,3) [3,6) [6,8) [8,10)`.
#[derive(Debug, Clone, Copy)]
pub struct StaticPartition {
    pub len: usize,
}

impl StaticPartition {
    pub fn new(len: usize) -> Self {
        StaticPartition { len }
    }

    /// The block assigned to `worker` out of `workers`.
    pub fn block(&self, worker: usize, workers: usize) -> Range<usize> {
        let base = self.len / workers;
        let extra = self.len % workers;
        let start = worker * base + worker.min(extra);
        let size = base + usize::from(worker < extra);
        start..start + size
    }
}

impl Partition for StaticPartition {
    fn len(&self) -> usize {
        self.len
    }

    fn drive(
        &self,
        _state: &PartitionState,
        worker: usize,
        workers: usize,
        consume: &mut dyn FnMut(Range<usize>) -> bool,
    ) {
        let block = self.block(worker, workers);
        if !block.is_empty() {
            consume(block);
        }
    }
}

/// Fixed-size tiles claimed from a shared cursor until the range is
/// exhausted. Tile-to-worker assignment is load-dependent.
#[derive(Debug, Clone, Copy)]
pub struct DynamicPartition {
    pub len: usize,
    pub tile: usize,
}

impl DynamicPartition {
    pub fn new(len: usize, tile: usize) -> Self {
        DynamicPartition { len, tile: tile.max(1) }
    }
}

impl Partition for DynamicPartition {
    fn len(&self) -> usize {
        self.len
    }

    fn drive(
        &self,
        state: &PartitionState,
        _worker: usize,
        _workers: usize,
        consume: &mut dyn FnMut(Range<usize>) -> bool,
    ) {
        loop {
            let start = state.next.fetch_add(self.tile, Ordering::Relaxed);
            if start >= self.len {
                return;
            }
            let stop = (start + self.tile).min(self.len);
            if !consume(start..stop) {
                return;
            }
        }
    }
}

/// Fixed-size worker pool. Wraps a dedicated rayon pool so the engine's
/// work never mixes with a global pool the host application may be using.
pub struct ThreadPool {
    pool: rayon::ThreadPool,
    size: usize,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").field("size", &self.size).finish()
    }
}

impl ThreadPool {
    /// Create a pool with `num_threads` workers. Zero is clamped to one.
    pub fn new(num_threads: usize) -> Result<Self> {
        let size = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("quiver-worker-{i}"))
            .build()
            .map_err(|e| QuiverError::internal(format!("failed to build worker pool: {e}")))?;
        Ok(ThreadPool { pool, size })
    }

    /// Number of workers.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Replace the pool with one of `num_threads` workers (zero clamps to
    /// one). Waits for the old workers to finish and drop.
    pub fn resize(&mut self, num_threads: usize) -> Result<()> {
        let size = num_threads.max(1);
        if size != self.size {
            *self = ThreadPool::new(size)?;
        }
        Ok(())
    }

    /// Run `task` over `partition` on every worker and block until all
    /// ranges are processed. The second task argument is the worker index
    /// in `[0, size)`.
    ///
    /// The first error returned by any worker is surfaced after all
    /// workers have stopped; with a dynamic partition no further tiles are
    /// handed out once an error is recorded.
    pub fn run<P, F>(&self, partition: P, task: F) -> Result<()>
    where
        P: Partition,
        F: Fn(Range<usize>, usize) -> Result<()> + Sync,
    {
        if partition.len() == 0 {
            return Ok(());
        }
        let state = PartitionState::new();
        let first_error: Mutex<Option<QuiverError>> = Mutex::new(None);

        self.pool.broadcast(|ctx| {
            let worker = ctx.index();
            let workers = ctx.num_threads();
            partition.drive(&state, worker, workers, &mut |range| {
                if first_error.lock().is_some() {
                    return false;
                }
                match task(range, worker) {
                    Ok(()) => true,
                    Err(e) => {
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        false
                    }
                }
            });
        });

        match first_error.into_inner() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Run a closure inside the pool so rayon parallel iterators it uses
    /// execute on these workers. For data-parallel loops over disjoint
    /// mutable chunks; everything else goes through [`ThreadPool::run`].
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }
}
