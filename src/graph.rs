//! Fixed out-degree adjacency storage over dataset slots.
//!
//! Neighbor lists live in one flat allocation of `max_degree` slots per
//! node, so traversal touches a single predictable stride and a node's
//! list can be overwritten without moving its peers. The graph stores
//! slot indices only; vectors are resolved by index into the dataset.

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;

use crate::data::io::atomic_write;
use crate::error::{QuiverError, Result};

/// Magic bytes opening a native graph file.
pub const GRAPH_MAGIC: [u8; 4] = *b"QGPH";

/// Current graph format version.
pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// Directed graph on `u32` slot indices with a fixed maximum out-degree.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyGraph {
    max_degree: usize,
    lengths: Vec<u32>,
    storage: Vec<u32>,
}

impl AdjacencyGraph {
    /// An empty graph accepting up to `max_degree` neighbors per node.
    pub fn new(max_degree: usize) -> Result<Self> {
        if max_degree == 0 {
            return Err(QuiverError::invalid_argument("graph max degree must be positive"));
        }
        Ok(AdjacencyGraph { max_degree, lengths: Vec::new(), storage: Vec::new() })
    }

    /// An empty graph pre-sized for `nodes` nodes.
    pub fn with_nodes(nodes: usize, max_degree: usize) -> Result<Self> {
        let mut graph = Self::new(max_degree)?;
        graph.reserve(nodes);
        Ok(graph)
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.lengths.len()
    }

    #[inline]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Grow to hold at least `nodes` nodes, new nodes having empty lists.
    pub fn reserve(&mut self, nodes: usize) {
        if nodes > self.lengths.len() {
            self.lengths.resize(nodes, 0);
            self.storage.resize(nodes * self.max_degree, 0);
        }
    }

    /// Read-only view of node `i`'s neighbor list.
    #[inline]
    pub fn neighbors(&self, i: u32) -> &[u32] {
        let start = i as usize * self.max_degree;
        &self.storage[start..start + self.lengths[i as usize] as usize]
    }

    /// Replace node `i`'s neighbor list.
    ///
    /// The list must fit in `max_degree` entries; the builder guarantees
    /// the structural invariants (no self-loop, no duplicates).
    pub fn set_neighbors(&mut self, i: u32, neighbors: &[u32]) -> Result<()> {
        if neighbors.len() > self.max_degree {
            return Err(QuiverError::invalid_argument(format!(
                "{} neighbors exceed the maximum degree {}",
                neighbors.len(),
                self.max_degree
            )));
        }
        debug_assert!(!neighbors.contains(&i), "self-loop on node {i}");
        let start = i as usize * self.max_degree;
        self.storage[start..start + neighbors.len()].copy_from_slice(neighbors);
        self.lengths[i as usize] = neighbors.len() as u32;
        Ok(())
    }

    /// Split borrows of the raw rows and lengths, for parallel rewrites.
    pub(crate) fn raw_parts_mut(&mut self) -> (&mut [u32], &mut [u32], usize) {
        (&mut self.storage, &mut self.lengths, self.max_degree)
    }

    /// Verify the structural invariants for a graph over `n_slots` slots:
    /// every neighbor in range, no self-loops, no duplicates, and degree
    /// within bound. Violations are reported as [`QuiverError::Internal`].
    pub fn check_invariants(&self, n_slots: usize) -> Result<()> {
        if self.n_nodes() != n_slots {
            return Err(QuiverError::internal(format!(
                "graph has {} nodes for {} slots",
                self.n_nodes(),
                n_slots
            )));
        }
        let mut seen: Vec<u32> = Vec::with_capacity(self.max_degree);
        for node in 0..self.n_nodes() as u32 {
            let list = self.neighbors(node);
            if list.len() > self.max_degree {
                return Err(QuiverError::internal(format!("node {node} exceeds the degree bound")));
            }
            seen.clear();
            for &m in list {
                if m as usize >= n_slots {
                    return Err(QuiverError::internal(format!("node {node} references slot {m} out of range")));
                }
                if m == node {
                    return Err(QuiverError::internal(format!("node {node} has a self-loop")));
                }
                if seen.contains(&m) {
                    return Err(QuiverError::internal(format!("node {node} lists {m} twice")));
                }
                seen.push(m);
            }
        }
        Ok(())
    }

    /// Save to a native graph file, atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(32 + self.storage.len() * 4);
        bytes.extend_from_slice(&GRAPH_MAGIC);
        bytes.extend_from_slice(&GRAPH_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.n_nodes() as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.max_degree as u64).to_le_bytes());
        for node in 0..self.n_nodes() as u32 {
            let list = self.neighbors(node);
            bytes.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for &m in list {
                bytes.extend_from_slice(&m.to_le_bytes());
            }
        }
        atomic_write(path, &bytes)?;
        debug!("saved graph of {} nodes (R={}) to {}", self.n_nodes(), self.max_degree, path.display());
        Ok(())
    }

    /// Load from a native graph file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(fs::File::open(path)?);
        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic, path)?;
        if magic != GRAPH_MAGIC {
            return Err(QuiverError::malformed(format!("{} is not a native graph file", path.display())));
        }
        let mut word = [0u8; 4];
        read_exact(&mut reader, &mut word, path)?;
        let version = u32::from_le_bytes(word);
        if version != GRAPH_FORMAT_VERSION {
            return Err(QuiverError::malformed(format!(
                "{} has graph format version {version}, this build reads {GRAPH_FORMAT_VERSION}",
                path.display()
            )));
        }
        let mut long = [0u8; 8];
        read_exact(&mut reader, &mut long, path)?;
        let nodes = u64::from_le_bytes(long) as usize;
        read_exact(&mut reader, &mut long, path)?;
        let max_degree = u64::from_le_bytes(long) as usize;

        let mut graph = AdjacencyGraph::with_nodes(nodes, max_degree)?;
        let mut list = Vec::with_capacity(max_degree);
        for node in 0..nodes as u32 {
            read_exact(&mut reader, &mut word, path)?;
            let len = u32::from_le_bytes(word) as usize;
            if len > max_degree {
                return Err(QuiverError::malformed(format!(
                    "{} node {node} declares {len} neighbors over the bound {max_degree}",
                    path.display()
                )));
            }
            list.clear();
            for _ in 0..len {
                read_exact(&mut reader, &mut word, path)?;
                list.push(u32::from_le_bytes(word));
            }
            graph.set_neighbors(node, &list)?;
        }
        debug!("loaded graph of {nodes} nodes (R={max_degree}) from {}", path.display());
        Ok(graph)
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], path: &Path) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            QuiverError::malformed(format!("{} is truncated", path.display()))
        } else {
            QuiverError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_read_neighbors() {
        let mut graph = AdjacencyGraph::with_nodes(4, 3).unwrap();
        assert!(graph.neighbors(0).is_empty());

        graph.set_neighbors(0, &[1, 2]).unwrap();
        graph.set_neighbors(3, &[0]).unwrap();
        assert_eq!(graph.neighbors(0), &[1, 2]);
        assert_eq!(graph.neighbors(3), &[0]);

        // Overwrite shrinks the visible list.
        graph.set_neighbors(0, &[3]).unwrap();
        assert_eq!(graph.neighbors(0), &[3]);
    }

    #[test]
    fn degree_bound_is_enforced() {
        let mut graph = AdjacencyGraph::with_nodes(4, 2).unwrap();
        assert!(graph.set_neighbors(0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn reserve_grows_without_touching_existing_lists() {
        let mut graph = AdjacencyGraph::with_nodes(2, 2).unwrap();
        graph.set_neighbors(0, &[1]).unwrap();
        graph.reserve(5);
        assert_eq!(graph.n_nodes(), 5);
        assert_eq!(graph.neighbors(0), &[1]);
        assert!(graph.neighbors(4).is_empty());
    }

    #[test]
    fn invariant_checks_catch_violations() {
        let mut graph = AdjacencyGraph::with_nodes(3, 2).unwrap();
        graph.set_neighbors(0, &[1, 2]).unwrap();
        graph.check_invariants(3).unwrap();

        // Out-of-range reference.
        graph.set_neighbors(1, &[9]).unwrap();
        assert!(matches!(graph.check_invariants(3), Err(QuiverError::Internal(_))));
    }

    #[test]
    fn zero_degree_is_rejected() {
        assert!(AdjacencyGraph::new(0).is_err());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.svs");

        let mut graph = AdjacencyGraph::with_nodes(3, 4).unwrap();
        graph.set_neighbors(0, &[1, 2]).unwrap();
        graph.set_neighbors(2, &[0]).unwrap();
        graph.save(&path).unwrap();

        let loaded = AdjacencyGraph::load(&path).unwrap();
        assert_eq!(loaded, graph);

        // Truncation is malformed.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(AdjacencyGraph::load(&path), Err(QuiverError::Malformed(_))));
    }
}
