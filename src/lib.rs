//! quiver: exact and approximate nearest-neighbor search over dense
//! vector datasets.
//!
//! Clients supply fixed-dimensional numeric vectors and issue batched
//! queries for the `k` closest entries under a chosen measure (squared
//! Euclidean, inner product, cosine). Two engines share the same storage,
//! distance, and threading substrate:
//!
//! - [`FlatIndex`]: exhaustive search. Exact, and the ground truth the
//!   tests hold the graph engine against.
//! - [`DynamicIndex`]: a Vamana-style proximity graph with greedy beam
//!   search, online insert and soft delete, graph consolidation around
//!   tombstones, and slot compaction.
//!
//! # Which engine?
//!
//! Flat search is exact and simple; on small datasets (tens of
//! thousands of vectors) it is also the fastest option. The graph index
//! answers queries in sublinear time at a recall controlled by the
//! search window size, and supports mutation without a rebuild.
//!
//! ```no_run
//! use quiver::{DynamicIndex, DenseVectors, SquaredL2, VamanaBuildParameters, VectorsRef};
//!
//! # fn main() -> quiver::Result<()> {
//! let mut data = DenseVectors::new(128)?;
//! # let some_vector = [0.0f32; 128];
//! data.append(&some_vector)?;
//!
//! let params = VamanaBuildParameters::default();
//! let index = DynamicIndex::build(params, data, &[7], SquaredL2, 4)?;
//!
//! let queries: Vec<f32> = vec![0.0; 128];
//! let result = index.search(VectorsRef::new(&queries, 128)?, 10)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! All parallelism lives behind a fixed worker pool owned by each index;
//! public calls block until their work completes. Searches take `&self`
//! and may run concurrently; mutations take `&mut self`.

pub mod builder;
pub mod compact;
pub mod data;
pub mod distance;
pub mod dynamic;
pub mod elements;
pub mod error;
pub mod eval;
pub mod flat;
pub mod graph;
pub mod medoid;
pub mod neighbor;
pub mod result;
pub mod search;
pub mod simd;
pub mod sorter;
pub mod threads;
pub mod translate;
pub mod version;

pub use builder::VamanaBuildParameters;
pub use data::{DenseVectors, VectorsRef};
pub use distance::{BroadcastDistance, Cosine, Distance, InnerProduct, SquaredL2};
pub use dynamic::DynamicIndex;
pub use elements::{Element, ElementKind};
pub use error::{QuiverError, Result};
pub use flat::FlatIndex;
pub use graph::AdjacencyGraph;
pub use neighbor::{DistanceOrder, MaxSimilarity, MinDistance, Neighbor};
pub use result::QueryResult;
pub use threads::{DynamicPartition, StaticPartition, ThreadPool};
pub use translate::IdTranslator;
pub use version::{Version, LIBRARY_VERSION};
