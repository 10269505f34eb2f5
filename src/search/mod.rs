//! Greedy best-first graph search.
//!
//! The classic Vamana query loop: seed the beam with the entry points,
//! repeatedly expand the best unvisited entry, push every acceptable
//! neighbor, stop when the beam has no unexpanded entry left. The beam
//! ([`SearchBuffer`]) bounds how far the frontier may wander; the
//! [`VisitedSet`] guarantees a node is expanded at most once per query
//! even after it falls out of the beam.

pub mod buffer;
pub mod visited;

pub use buffer::SearchBuffer;
pub use visited::VisitedSet;

use smallvec::SmallVec;

use crate::data::DenseVectors;
use crate::distance::Distance;
use crate::elements::Element;
use crate::graph::AdjacencyGraph;
use crate::neighbor::Neighbor;

/// Reusable per-worker scratch for graph searches.
///
/// One instance per worker thread; `search` resets it between queries.
#[derive(Debug)]
pub struct SearchScratch<D> {
    pub visited: VisitedSet,
    pub distance: D,
}

impl<D: Clone> SearchScratch<D> {
    pub fn new(distance: &D) -> Self {
        SearchScratch { visited: VisitedSet::default(), distance: distance.clone() }
    }
}

/// Run greedy beam search for `query`, filling `buffer` with the closest
/// discovered entries.
///
/// Only slots accepted by `predicate` enter the beam; entry points failing
/// it are skipped. When `trace` is given, every expanded node is appended
/// to it in expansion order (the builder's candidate gathering).
#[allow(clippy::too_many_arguments)]
pub fn greedy_search<T, D, P>(
    data: &DenseVectors<T>,
    graph: &AdjacencyGraph,
    query: &[f32],
    entry_points: &[u32],
    buffer: &mut SearchBuffer<D::Order>,
    scratch: &mut SearchScratch<D>,
    predicate: P,
    mut trace: Option<&mut Vec<Neighbor>>,
) where
    T: Element,
    D: Distance<T>,
    P: Fn(u32) -> bool,
{
    buffer.clear();
    scratch.visited.ensure_capacity(data.size());
    scratch.visited.clear();
    scratch.distance.fix_argument(query);

    for &entry in entry_points {
        if predicate(entry) && scratch.visited.insert(entry) {
            let d = scratch.distance.compute(query, data.get(entry));
            buffer.push(Neighbor::new(entry, d));
        }
    }

    let mut candidates: SmallVec<[u32; 64]> = SmallVec::new();
    while let Some(frontier) = buffer.next_unvisited() {
        if let Some(out) = trace.as_deref_mut() {
            out.push(frontier);
        }

        candidates.clear();
        for &m in graph.neighbors(frontier.id) {
            if predicate(m) && scratch.visited.insert(m) {
                data.prefetch(m);
                candidates.push(m);
            }
        }
        for &m in &candidates {
            let d = scratch.distance.compute(query, data.get(m));
            buffer.push(Neighbor::new(m, d));
        }
    }
}
