//! Disjoint Set Union (DSU) data structure with parity tracking.
//!
//! Implements a union-find data structure that maintains disjoint sets of
//! nodes while tracking, per set, the parity of detection events inside it
//! and whether it has reached the boundary. A cluster is neutral (needs no
//! further growth) when its parity is even or it touches the boundary.

use crate::bit_utils::BitPack;

/// Union-Find data structure with parity tracking for decoder clusters.
///
/// Owns its storage so a decoder can keep one instance and reset it for each
/// shot instead of reallocating. Uses path halving and union by rank.
#[derive(Debug, Default)]
pub struct UnionFind {
    /// Parent pointer array for the union-find forest.
    ///
    /// Root nodes point to themselves. Finds halve the path as they walk it.
    parent: Vec<usize>,

    /// Rank array for union-by-rank heuristic.
    rank: Vec<u8>,

    /// Parity bit per set root, packed 64 to a word.
    parity: Vec<u64>,

    /// Boundary-contact bit per set root, packed 64 to a word.
    boundary: Vec<u64>,
}

impl UnionFind {
    pub fn new(num_nodes: usize) -> Self {
        let mut dsu = Self::default();
        dsu.reset(num_nodes);
        dsu
    }

    /// Returns every node to a singleton set with even parity.
    pub fn reset(&mut self, num_nodes: usize) {
        self.parent.clear();
        self.parent.extend(0..num_nodes);
        self.rank.clear();
        self.rank.resize(num_nodes, 0);
        BitPack::reset(&mut self.parity, num_nodes);
        BitPack::reset(&mut self.boundary, num_nodes);
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Finds the root of the set containing node i, halving the path.
    #[inline(always)]
    pub fn find(&mut self, mut i: usize) -> usize {
        while i != self.parent[i] {
            let p = self.parent[i];
            let gp = self.parent[p];
            self.parent[i] = gp;
            i = p;
        }
        i
    }

    /// Merges the sets containing nodes i and j.
    ///
    /// The merged root carries the XOR of both parities and the OR of both
    /// boundary flags. Returns false if the nodes were already united.
    pub fn union(&mut self, i: usize, j: usize) -> bool {
        let (root_i, root_j) = (self.find(i), self.find(j));
        if root_i == root_j {
            return false;
        }

        let (keep, absorb) = if self.rank[root_i] < self.rank[root_j] {
            (root_j, root_i)
        } else {
            if self.rank[root_i] == self.rank[root_j] {
                self.rank[root_i] += 1;
            }
            (root_i, root_j)
        };

        self.parent[absorb] = keep;
        if BitPack::get(&self.parity, absorb) {
            BitPack::toggle(&mut self.parity, keep);
        }
        if BitPack::get(&self.boundary, absorb) {
            BitPack::set(&mut self.boundary, keep, true);
        }
        true
    }

    /// Toggles the parity of the set containing node i.
    ///
    /// Each detection event toggles the parity of its detector's set.
    pub fn toggle_parity(&mut self, i: usize) {
        let root = self.find(i);
        BitPack::toggle(&mut self.parity, root);
    }

    /// Marks the set containing node i as touching the boundary.
    pub fn mark_boundary(&mut self, i: usize) {
        let root = self.find(i);
        BitPack::set(&mut self.boundary, root, true);
    }

    /// True if the set containing node i still needs to grow.
    ///
    /// A set is active while it holds an odd number of detection events and
    /// has not reached the boundary.
    pub fn is_active(&mut self, i: usize) -> bool {
        let root = self.find(i);
        BitPack::get(&self.parity, root) && !BitPack::get(&self.boundary, root)
    }
}
