use crate::dsu::UnionFind;
use crate::graph::DecodingGraph;
use crate::{ProtocolError, Result};
use std::collections::VecDeque;

/// Union-find decoder over a [`DecodingGraph`].
///
/// Holds only scratch buffers, so one instance can decode many shots in a
/// row without reallocating. It carries no configuration and is never shared
/// between invocations; each invocation builds its own.
#[derive(Debug, Default)]
pub struct UnionFindDecoder {
    dsu: UnionFind,
    defect: Vec<bool>,
    merges: Vec<usize>,
    forest: Vec<usize>,
    tree: Vec<Vec<(usize, usize)>>,
    touched: Vec<usize>,
    visited: Vec<bool>,
    order: Vec<(usize, Option<(usize, usize)>)>,
}

impl UnionFindDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicts the observable flips for one shot.
    ///
    /// `syndrome` lists the detectors that fired. Returns the bitmask of
    /// observables the correction flips. Fails if a detector is outside the
    /// graph or a cluster can neither pair up nor reach the boundary.
    pub fn decode(&mut self, graph: &DecodingGraph, syndrome: &[usize]) -> Result<u64> {
        if syndrome.is_empty() {
            return Ok(0);
        }
        self.prepare(graph, syndrome)?;
        self.grow(graph)?;
        self.peel(graph)
    }

    fn prepare(&mut self, graph: &DecodingGraph, syndrome: &[usize]) -> Result<()> {
        let num_nodes = graph.num_nodes();
        self.dsu.reset(num_nodes);
        self.dsu.mark_boundary(graph.boundary());
        self.defect.clear();
        self.defect.resize(num_nodes, false);
        self.forest.clear();

        for &det in syndrome {
            if det >= graph.num_detectors() {
                return Err(ProtocolError::decode(format!(
                    "detector D{det} is outside the {} detector graph",
                    graph.num_detectors()
                )));
            }
            self.defect[det] = !self.defect[det];
            self.dsu.toggle_parity(det);
        }
        Ok(())
    }

    /// Grows every active cluster along all of its boundary edges each round
    /// until no cluster is active. Edges that merge two clusters form a
    /// spanning forest of the grown region.
    fn grow(&mut self, graph: &DecodingGraph) -> Result<()> {
        loop {
            self.merges.clear();
            for (idx, edge) in graph.edges.iter().enumerate() {
                let (ru, rv) = (self.dsu.find(edge.u), self.dsu.find(edge.v));
                if ru != rv && (self.dsu.is_active(ru) || self.dsu.is_active(rv)) {
                    self.merges.push(idx);
                }
            }

            if self.merges.is_empty() {
                break;
            }
            for &idx in &self.merges {
                let edge = &graph.edges[idx];
                if self.dsu.union(edge.u, edge.v) {
                    self.forest.push(idx);
                }
            }
        }

        for node in 0..graph.num_detectors() {
            if self.defect[node] && self.dsu.is_active(node) {
                return Err(ProtocolError::decode(format!(
                    "cluster around D{node} cannot be neutralised by the error model"
                )));
            }
        }
        Ok(())
    }

    /// Peels the spanning forest from its leaves inward.
    ///
    /// A node still holding a defect when it is peeled pushes the defect onto
    /// its parent and puts the connecting edge into the correction. Trees that
    /// touch the boundary are rooted there so a leftover defect is absorbed.
    fn peel(&mut self, graph: &DecodingGraph) -> Result<u64> {
        let num_nodes = graph.num_nodes();
        if self.tree.len() < num_nodes {
            self.tree.resize_with(num_nodes, Vec::new);
        }
        for &node in &self.touched {
            if let Some(list) = self.tree.get_mut(node) {
                list.clear();
            }
        }
        self.touched.clear();
        self.visited.clear();
        self.visited.resize(num_nodes, false);

        for &idx in &self.forest {
            let edge = &graph.edges[idx];
            for (a, b) in [(edge.u, edge.v), (edge.v, edge.u)] {
                if self.tree[a].is_empty() {
                    self.touched.push(a);
                }
                self.tree[a].push((b, idx));
            }
        }

        let boundary = graph.boundary();
        let mut roots = Vec::with_capacity(self.touched.len() + 1);
        roots.push(boundary);
        roots.extend(self.touched.iter().copied());

        let mut mask = 0u64;
        let mut queue = VecDeque::new();
        for root in roots {
            if self.visited[root] || self.tree[root].is_empty() {
                continue;
            }
            self.order.clear();
            self.visited[root] = true;
            queue.push_back((root, None));
            while let Some((node, via)) = queue.pop_front() {
                self.order.push((node, via));
                for &(next, idx) in &self.tree[node] {
                    if !self.visited[next] {
                        self.visited[next] = true;
                        queue.push_back((next, Some((node, idx))));
                    }
                }
            }

            for &(node, via) in self.order.iter().rev() {
                let Some((parent, idx)) = via else {
                    continue;
                };
                if self.defect[node] {
                    self.defect[node] = false;
                    self.defect[parent] = !self.defect[parent];
                    mask ^= graph.edges[idx].observables;
                }
            }

            if root != boundary && self.defect[root] {
                return Err(ProtocolError::decode(format!(
                    "peeling left an unmatched defect at D{root}"
                )));
            }
        }

        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Repetition code: detectors 0..n in a line, both ends attached to the
    /// boundary, the left boundary edge flipping observable 0.
    fn repetition_graph(n: usize) -> DecodingGraph {
        let mut graph = DecodingGraph::new(n);
        let boundary = graph.boundary();
        graph.add_edge(0, boundary, 1.0, 1).unwrap();
        for i in 0..n - 1 {
            graph.add_edge(i, i + 1, 1.0, 0).unwrap();
        }
        graph.add_edge(n - 1, boundary, 1.0, 0).unwrap();
        graph.build_adjacency();
        graph
    }

    #[test]
    fn empty_syndrome_predicts_nothing() {
        let graph = repetition_graph(4);
        let mut decoder = UnionFindDecoder::new();
        assert_eq!(decoder.decode(&graph, &[]).unwrap(), 0);
    }

    #[test]
    fn adjacent_pair_matches_internally() {
        let graph = repetition_graph(6);
        let mut decoder = UnionFindDecoder::new();
        assert_eq!(decoder.decode(&graph, &[2, 3]).unwrap(), 0);
    }

    #[test]
    fn defect_near_left_end_crosses_logical_edge() {
        let graph = repetition_graph(6);
        let mut decoder = UnionFindDecoder::new();
        assert_eq!(decoder.decode(&graph, &[0]).unwrap(), 1);
        assert_eq!(decoder.decode(&graph, &[5]).unwrap(), 0);
    }

    #[test]
    fn decoder_is_reusable_across_shots() {
        let graph = repetition_graph(5);
        let mut decoder = UnionFindDecoder::new();
        let first = decoder.decode(&graph, &[0]).unwrap();
        let _ = decoder.decode(&graph, &[1, 2]).unwrap();
        assert_eq!(decoder.decode(&graph, &[0]).unwrap(), first);
    }

    #[test]
    fn rejects_out_of_range_detectors() {
        let graph = repetition_graph(3);
        let mut decoder = UnionFindDecoder::new();
        assert!(matches!(
            decoder.decode(&graph, &[3]),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn isolated_defect_without_boundary_fails() {
        let mut graph = DecodingGraph::new(3);
        graph.add_edge(0, 1, 1.0, 0).unwrap();
        graph.build_adjacency();
        let mut decoder = UnionFindDecoder::new();
        assert!(decoder.decode(&graph, &[2]).is_err());
        assert!(decoder.decode(&graph, &[0]).is_err());
        assert_eq!(decoder.decode(&graph, &[0, 1]).unwrap(), 0);
    }
}
