//! Decoding graph representation for graph-based decoders.
//!
//! Implements the graph structure that encodes a detector error model's
//! topology. Nodes are detectors, plus one virtual boundary node that absorbs
//! mechanisms flipping a single detector. Edges are error mechanisms, each
//! annotated with the observables flipped when that edge is part of a
//! correction.

use crate::dem::{DetectorErrorModel, Symptom};
use crate::{ProtocolError, Result};
use std::collections::HashMap;

/// Graph edge between two nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub u: usize,
    pub v: usize,

    /// Negative log probability of the underlying mechanism.
    ///
    /// Parallel mechanisms are merged into the most likely one, so the edge
    /// keeps the smallest weight seen.
    pub weight: f64,

    /// Observables flipped when this edge is in the correction.
    pub observables: u64,
}

/// Decoding graph built from a detector error model.
///
/// Edges are stored in a flat list and indexed by a compressed adjacency
/// table built once after construction.
#[derive(Debug, Clone, Default)]
pub struct DecodingGraph {
    pub edges: Vec<Edge>,

    num_detectors: usize,

    /// `adjacency[adj_offsets[n]..adj_offsets[n + 1]]` lists edge indices
    /// incident to node `n`.
    adj_offsets: Vec<usize>,
    adjacency: Vec<usize>,

    lookup: HashMap<(usize, usize), usize>,
}

impl DecodingGraph {
    /// Creates an empty graph over `num_detectors` detectors.
    pub fn new(num_detectors: usize) -> Self {
        Self {
            num_detectors,
            ..Self::default()
        }
    }

    /// Builds the graph for a parsed error model.
    ///
    /// Each component of each mechanism becomes one edge: two detectors give
    /// an ordinary edge, one detector gives an edge to the boundary. Components
    /// flipping more than two detectors are chained through consecutive
    /// detectors with the observables carried on the first link. Components
    /// flipping no detector cannot be seen by a graph decoder and are skipped.
    pub fn from_dem(dem: &DetectorErrorModel) -> Result<Self> {
        let mut graph = Self::new(dem.num_detectors);

        for mechanism in &dem.mechanisms {
            if mechanism.probability <= 0.0 {
                continue;
            }
            let weight = -mechanism.probability.ln();
            for component in &mechanism.components {
                graph.add_component(component, weight)?;
            }
        }

        graph.build_adjacency();
        Ok(graph)
    }

    fn add_component(&mut self, component: &Symptom, weight: f64) -> Result<()> {
        let observables = component.observable_mask()?;
        let boundary = self.boundary();
        match component.detectors.as_slice() {
            [] => {}
            [d] => self.add_edge(*d, boundary, weight, observables)?,
            [a, b] => self.add_edge(*a, *b, weight, observables)?,
            chain => {
                self.add_edge(chain[0], chain[1], weight, observables)?;
                for pair in chain[1..].windows(2) {
                    self.add_edge(pair[0], pair[1], weight, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Adds an undirected edge between nodes u and v.
    ///
    /// If an edge between the same nodes exists, the lighter of the two wins
    /// along with its observable mask.
    pub fn add_edge(&mut self, u: usize, v: usize, weight: f64, observables: u64) -> Result<()> {
        let limit = self.boundary();
        if u > limit || v > limit {
            return Err(ProtocolError::decode(format!(
                "edge ({u}, {v}) references a node outside the {} detectors",
                self.num_detectors
            )));
        }
        if u == v {
            return Ok(());
        }

        let key = (u.min(v), u.max(v));
        match self.lookup.get(&key) {
            Some(&idx) => {
                let edge = &mut self.edges[idx];
                if weight < edge.weight {
                    edge.weight = weight;
                    edge.observables = observables;
                }
            }
            None => {
                self.lookup.insert(key, self.edges.len());
                self.edges.push(Edge {
                    u: key.0,
                    v: key.1,
                    weight,
                    observables,
                });
            }
        }
        Ok(())
    }

    /// Rebuilds the adjacency table from the edge list.
    pub fn build_adjacency(&mut self) {
        let n = self.num_nodes();
        let mut degree = vec![0usize; n + 1];
        for edge in &self.edges {
            degree[edge.u + 1] += 1;
            degree[edge.v + 1] += 1;
        }
        for i in 0..n {
            degree[i + 1] += degree[i];
        }

        let mut cursor = degree.clone();
        self.adjacency = vec![0; degree[n]];
        for (idx, edge) in self.edges.iter().enumerate() {
            self.adjacency[cursor[edge.u]] = idx;
            cursor[edge.u] += 1;
            self.adjacency[cursor[edge.v]] = idx;
            cursor[edge.v] += 1;
        }
        self.adj_offsets = degree;
    }

    /// Edge indices incident to `node`.
    pub fn incident(&self, node: usize) -> &[usize] {
        match (self.adj_offsets.get(node), self.adj_offsets.get(node + 1)) {
            (Some(&start), Some(&end)) => &self.adjacency[start..end],
            _ => &[],
        }
    }

    /// Index of the virtual boundary node.
    pub fn boundary(&self) -> usize {
        self.num_detectors
    }

    pub fn num_detectors(&self) -> usize {
        self.num_detectors
    }

    /// Number of nodes including the boundary node.
    pub fn num_nodes(&self) -> usize {
        self.num_detectors + 1
    }
}
