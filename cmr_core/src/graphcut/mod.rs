//! N-dimensional Boykov-Kolmogorov min-cut / max-flow,
//! grounded in `original_source/src/bkTools/graphcut/GraphCutBase_Run.h`.
//!
//! Deliberately single-threaded: the active list,
//! orphan queue and timestamp-memoized distances all share mutable state
//! that a grow/augment/adopt step reads and writes in the same pass.

use crate::error::{CmrError, Result};
use bitflags::bitflags;
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Coordinate tuple for a lattice node. Most lattices used in practice are
/// 2D or 3D, so this stays inline for `ndim <= 4` and only spills for
/// higher-dimensional lattices.
type Coords = SmallVec<[usize; 4]>;

const EPS: f64 = 1e-9;

bitflags! {
    struct NodeFlags: u8 {
        const ACTIVE = 0b0001;
        const ORPHAN = 0b0010;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TreeSet {
    Free,
    Source,
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Parent {
    None,
    Terminal,
    Dir(usize),
}

/// Which side of the minimum cut a node ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutSide {
    Source,
    Sink,
}

/// Result of a converged [`BkSolver::run`].
#[derive(Clone, Debug)]
pub struct CutResult {
    assignment: Vec<CutSide>,
    flow_value: f64,
}

impl CutResult {
    pub fn side(&self, node: usize) -> CutSide {
        self.assignment[node]
    }

    pub fn flow_value(&self) -> f64 {
        self.flow_value
    }

    pub fn assignment(&self) -> &[CutSide] {
        &self.assignment
    }
}

/// A Boykov-Kolmogorov min-cut problem on an N-dimensional axis-aligned
/// lattice. Nodes are connected to their `2 * shape.len()` axis neighbors;
/// terminal and inter-node capacities are set by the caller before [`run`](Self::run).
pub struct BkSolver {
    shape: Vec<usize>,
    strides: Vec<usize>,
    ndim: usize,
    degree: usize,
    num_nodes: usize,

    source_cap: Vec<f64>,
    sink_cap: Vec<f64>,
    /// Residual capacity per (node, direction), length `num_nodes * degree`.
    edge_cap: Vec<f64>,

    set: Vec<TreeSet>,
    parent: Vec<Parent>,
    flags: Vec<NodeFlags>,

    active: VecDeque<usize>,
    orphans: VecDeque<usize>,

    distance_cache: Vec<i64>,
    distance_timestamp: Vec<u64>,
    global_timestamp: u64,

    total_flow: f64,
}

impl BkSolver {
    /// Creates a solver for a lattice of the given shape, with zero
    /// capacities everywhere.
    pub fn new(shape: &[usize]) -> Self {
        let ndim = shape.len();
        let degree = 2 * ndim;
        let num_nodes: usize = shape.iter().product();

        let mut strides = vec![1usize; ndim];
        for axis in 1..ndim {
            strides[axis] = strides[axis - 1] * shape[axis - 1];
        }

        Self {
            shape: shape.to_vec(),
            strides,
            ndim,
            degree,
            num_nodes,
            source_cap: vec![0.0; num_nodes],
            sink_cap: vec![0.0; num_nodes],
            edge_cap: vec![0.0; num_nodes * degree],
            set: vec![TreeSet::Free; num_nodes],
            parent: vec![Parent::None; num_nodes],
            flags: vec![NodeFlags::empty(); num_nodes],
            active: VecDeque::new(),
            orphans: VecDeque::new(),
            distance_cache: vec![0; num_nodes],
            distance_timestamp: vec![0; num_nodes],
            global_timestamp: 0,
            total_flow: 0.0,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Flattens N-dimensional coordinates into a node index.
    pub fn node_index(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.ndim);
        coords.iter().zip(&self.strides).map(|(c, s)| c * s).sum()
    }

    fn node_coords(&self, node: usize) -> Coords {
        let mut coords: Coords = std::iter::repeat(0usize).take(self.ndim).collect();
        for axis in (0..self.ndim).rev() {
            coords[axis] = node / self.strides[axis] % self.shape[axis];
        }
        coords
    }

    pub fn set_source_capacity(&mut self, coords: &[usize], cap: f64) {
        let n = self.node_index(coords);
        self.source_cap[n] = cap;
    }

    pub fn set_sink_capacity(&mut self, coords: &[usize], cap: f64) {
        let n = self.node_index(coords);
        self.sink_cap[n] = cap;
    }

    /// Sets the capacity of the edge leaving `coords` along `axis` in the
    /// positive direction, and (independently) the capacity of its reverse.
    /// Use equal `forward`/`backward` values for an undirected edge.
    pub fn set_edge_capacity(&mut self, coords: &[usize], axis: usize, forward: f64, backward: f64) {
        let n = self.node_index(coords);
        let pos_dir = 2 * axis + 1;
        if let Some(neighbor) = self.neighbor(n, pos_dir) {
            let fwd_idx = self.idx(n, pos_dir);
            let bwd_idx = self.idx(neighbor, pos_dir ^ 1);
            self.edge_cap[fwd_idx] = forward;
            self.edge_cap[bwd_idx] = backward;
        }
    }

    #[inline]
    fn idx(&self, node: usize, dir: usize) -> usize {
        node * self.degree + dir
    }

    fn neighbor(&self, node: usize, dir: usize) -> Option<usize> {
        let axis = dir / 2;
        let positive = dir % 2 == 1;
        let coords = self.node_coords(node);
        if positive {
            if coords[axis] + 1 >= self.shape[axis] {
                return None;
            }
            Some(node + self.strides[axis])
        } else {
            if coords[axis] == 0 {
                return None;
            }
            Some(node - self.strides[axis])
        }
    }

    fn push_active(&mut self, node: usize) {
        if !self.flags[node].contains(NodeFlags::ACTIVE) {
            self.flags[node].insert(NodeFlags::ACTIVE);
            self.active.push_back(node);
        }
    }

    fn enqueue_orphan(&mut self, node: usize) {
        self.parent[node] = Parent::None;
        if !self.flags[node].contains(NodeFlags::ORPHAN) {
            self.flags[node].insert(NodeFlags::ORPHAN);
            self.orphans.push_back(node);
        }
    }

    fn initialize(&mut self) {
        for node in 0..self.num_nodes {
            if self.source_cap[node] > EPS {
                self.set[node] = TreeSet::Source;
                self.parent[node] = Parent::Terminal;
                self.push_active(node);
            } else if self.sink_cap[node] > EPS {
                self.set[node] = TreeSet::Sink;
                self.parent[node] = Parent::Terminal;
                self.push_active(node);
            }
        }
    }

    /// Pops the front active node and grows its tree. Returns the contact
    /// `(p, q, dir)` where `p` is in the source tree, `q` in the sink tree,
    /// and `dir` is the direction from `p` to `q`; or `None` once the active
    /// list empties (the cut has converged).
    fn grow(&mut self) -> Option<(usize, usize, usize)> {
        while let Some(node) = self.active.pop_front() {
            let tree = self.set[node];
            if tree == TreeSet::Free {
                self.flags[node].remove(NodeFlags::ACTIVE);
                continue;
            }

            let mut contact = None;
            for d in 0..self.degree {
                let Some(nb) = self.neighbor(node, d) else {
                    continue;
                };
                let cap = self.edge_cap[self.idx(node, d)];
                if cap <= EPS {
                    continue;
                }
                match self.set[nb] {
                    TreeSet::Free => {
                        self.set[nb] = tree;
                        self.parent[nb] = Parent::Dir(d ^ 1);
                        self.push_active(nb);
                    }
                    other if other != tree => {
                        let (p, q, dir) = if tree == TreeSet::Source {
                            (node, nb, d)
                        } else {
                            (nb, node, d ^ 1)
                        };
                        contact = Some((p, q, dir));
                        break;
                    }
                    _ => {}
                }
            }

            if let Some(c) = contact {
                // node may still have unexplored capacity; keep it active.
                self.active.push_front(node);
                return Some(c);
            }

            self.flags[node].remove(NodeFlags::ACTIVE);
        }
        None
    }

    fn path_to_root(&self, start: usize) -> Vec<usize> {
        let mut path = vec![start];
        let mut cur = start;
        loop {
            match self.parent[cur] {
                Parent::Terminal => break,
                Parent::Dir(d) => {
                    let par = self.neighbor(cur, d).expect("broken parent link");
                    path.push(par);
                    cur = par;
                }
                Parent::None => unreachable!("path_to_root on disconnected node"),
            }
        }
        path
    }

    fn augment(&mut self, p: usize, q: usize, dir_pq: usize) {
        self.global_timestamp += 1;

        let mut src_path = self.path_to_root(p);
        src_path.reverse(); // root_src, ..., p

        let sink_path = self.path_to_root(q); // q, ..., root_sink

        let root_src = *src_path.first().unwrap();
        let root_sink = *sink_path.last().unwrap();

        let mut bottleneck = self.source_cap[root_src];
        for w in src_path.windows(2) {
            let (parent_node, child_node) = (w[0], w[1]);
            let dc = match self.parent[child_node] {
                Parent::Dir(d) => d,
                _ => unreachable!(),
            };
            bottleneck = bottleneck.min(self.edge_cap[self.idx(parent_node, dc ^ 1)]);
        }
        bottleneck = bottleneck.min(self.edge_cap[self.idx(p, dir_pq)]);
        for w in sink_path.windows(2) {
            let (child_node, parent_node) = (w[0], w[1]);
            let dc = match self.parent[child_node] {
                Parent::Dir(d) => d,
                _ => unreachable!(),
            };
            bottleneck = bottleneck.min(self.edge_cap[self.idx(child_node, dc)]);
            let _ = parent_node;
        }
        bottleneck = bottleneck.min(self.sink_cap[root_sink]);

        if bottleneck <= EPS {
            return;
        }
        self.total_flow += bottleneck;

        self.source_cap[root_src] -= bottleneck;
        if self.source_cap[root_src] <= EPS {
            self.enqueue_orphan(root_src);
        }

        for w in src_path.windows(2) {
            let (parent_node, child_node) = (w[0], w[1]);
            let dc = match self.parent[child_node] {
                Parent::Dir(d) => d,
                _ => unreachable!(),
            };
            let fwd = self.idx(parent_node, dc ^ 1);
            let rev = self.idx(child_node, dc);
            self.edge_cap[fwd] -= bottleneck;
            self.edge_cap[rev] += bottleneck;
            if self.edge_cap[fwd] <= EPS {
                self.enqueue_orphan(child_node);
            }
        }

        {
            let fwd = self.idx(p, dir_pq);
            let rev = self.idx(q, dir_pq ^ 1);
            self.edge_cap[fwd] -= bottleneck;
            self.edge_cap[rev] += bottleneck;
        }

        for w in sink_path.windows(2) {
            let (child_node, parent_node) = (w[0], w[1]);
            let dc = match self.parent[child_node] {
                Parent::Dir(d) => d,
                _ => unreachable!(),
            };
            let fwd = self.idx(child_node, dc);
            let rev = self.idx(parent_node, dc ^ 1);
            self.edge_cap[fwd] -= bottleneck;
            self.edge_cap[rev] += bottleneck;
            if self.edge_cap[fwd] <= EPS {
                self.enqueue_orphan(child_node);
            }
        }

        self.sink_cap[root_sink] -= bottleneck;
        if self.sink_cap[root_sink] <= EPS {
            self.enqueue_orphan(root_sink);
        }
    }

    /// Distance (in tree edges) from `node` up to its terminal, memoized
    /// per `global_timestamp`. Returns `None` if the parent chain is broken
    /// (the node is disconnected and should be treated as not yet adoptable).
    fn distance_to_terminal(&mut self, node: usize) -> Option<i64> {
        let mut path = Vec::new();
        let mut cur = node;
        loop {
            if self.distance_timestamp[cur] == self.global_timestamp {
                let base = self.distance_cache[cur];
                for (i, &n) in path.iter().enumerate() {
                    let d = base + (path.len() - i) as i64;
                    self.distance_cache[n] = d;
                    self.distance_timestamp[n] = self.global_timestamp;
                }
                return Some(base + path.len() as i64);
            }
            match self.parent[cur] {
                Parent::Terminal => {
                    self.distance_cache[cur] = 0;
                    self.distance_timestamp[cur] = self.global_timestamp;
                    for (i, &n) in path.iter().enumerate() {
                        let d = (path.len() - i) as i64;
                        self.distance_cache[n] = d;
                        self.distance_timestamp[n] = self.global_timestamp;
                    }
                    return Some(path.len() as i64);
                }
                Parent::Dir(d) => {
                    let par = match self.neighbor(cur, d) {
                        Some(p) => p,
                        None => return None,
                    };
                    path.push(cur);
                    cur = par;
                    if path.len() > self.num_nodes {
                        return None;
                    }
                }
                Parent::None => return None,
            }
        }
    }

    fn adopt(&mut self) {
        while let Some(node) = self.orphans.pop_front() {
            self.flags[node].remove(NodeFlags::ORPHAN);
            if self.set[node] == TreeSet::Free {
                continue;
            }
            let tree = self.set[node];

            let mut best: Option<(usize, usize, i64)> = None; // (dir, neighbor, distance)
            for d in 0..self.degree {
                let Some(nb) = self.neighbor(node, d) else {
                    continue;
                };
                if self.set[nb] != tree {
                    continue;
                }
                let cap_nb_to_node = self.edge_cap[self.idx(nb, d ^ 1)];
                if cap_nb_to_node <= EPS {
                    continue;
                }
                if let Some(dist) = self.distance_to_terminal(nb) {
                    if best.map_or(true, |(_, _, bd)| dist < bd) {
                        best = Some((d, nb, dist));
                    }
                }
            }

            if let Some((d, _nb, dist)) = best {
                self.parent[node] = Parent::Dir(d);
                self.distance_cache[node] = dist + 1;
                self.distance_timestamp[node] = self.global_timestamp;
                continue;
            }

            self.set[node] = TreeSet::Free;
            self.parent[node] = Parent::None;
            self.flags[node].remove(NodeFlags::ACTIVE);

            for d in 0..self.degree {
                let Some(nb) = self.neighbor(node, d) else {
                    continue;
                };
                if self.set[nb] != tree {
                    continue;
                }
                if let Parent::Dir(pd) = self.parent[nb] {
                    if self.neighbor(nb, pd) == Some(node) {
                        self.enqueue_orphan(nb);
                        continue;
                    }
                }
                let cap_nb_to_node = self.edge_cap[self.idx(nb, d ^ 1)];
                if cap_nb_to_node > EPS {
                    self.push_active(nb);
                }
            }
        }
    }

    /// Runs the grow/augment/adopt loop to convergence and reports the
    /// minimum cut.
    pub fn run(mut self) -> Result<CutResult> {
        self.initialize();

        let safety_cap = self.num_nodes.saturating_mul(self.degree).max(64) * 64;
        let mut iterations = 0usize;

        loop {
            let Some((p, q, dir)) = self.grow() else {
                break;
            };
            self.augment(p, q, dir);
            self.adopt();

            iterations += 1;
            if iterations > safety_cap {
                return Err(CmrError::GraphCutDidNotConverge(iterations));
            }
        }

        let assignment = self
            .set
            .iter()
            .map(|&s| match s {
                TreeSet::Sink => CutSide::Sink,
                _ => CutSide::Source,
            })
            .collect();

        Ok(CutResult {
            assignment,
            flow_value: self.total_flow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_by_three_lattice_isolates_corner() {
        let mut solver = BkSolver::new(&[3, 3]);
        solver.set_source_capacity(&[0, 0], 10.0);
        solver.set_sink_capacity(&[2, 2], 10.0);

        for y in 0..3 {
            for x in 0..3 {
                if x + 1 < 3 {
                    let cap = if (x, y) == (1, 1) || (x + 1, y) == (1, 1) {
                        0.0
                    } else {
                        1.0
                    };
                    solver.set_edge_capacity(&[x, y], 0, cap, cap);
                }
                if y + 1 < 3 {
                    let cap = if (x, y) == (1, 1) || (x, y + 1) == (1, 1) {
                        0.0
                    } else {
                        1.0
                    };
                    solver.set_edge_capacity(&[x, y], 1, cap, cap);
                }
            }
        }

        let result = solver.run().unwrap();
        assert!((result.flow_value() - 2.0).abs() < 1e-6);
        assert_eq!(result.side(0), CutSide::Source); // (0,0)
        assert_eq!(result.side(8), CutSide::Sink); // (2,2)
    }

    #[test]
    fn single_edge_saturates_at_its_capacity() {
        let mut solver = BkSolver::new(&[2]);
        solver.set_source_capacity(&[0], 5.0);
        solver.set_sink_capacity(&[1], 5.0);
        solver.set_edge_capacity(&[0], 0, 3.0, 3.0);

        let result = solver.run().unwrap();
        assert!((result.flow_value() - 3.0).abs() < 1e-6);
    }
}
