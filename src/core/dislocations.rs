use std::collections::VecDeque;

use nalgebra::Point3;

use crate::core::cluster::ClusterVector;
use crate::core::ATOM_VECTOR_EPSILON;
use crate::geometry::halfedge::CircuitId;

pub type SegmentId = usize;
pub type NodeId = usize;

/// A start or end node of a dislocation segment. Nodes meeting at a
/// common point are chained into a cyclic `junction_ring`; a dangling
/// node's ring contains only itself.
#[derive(Debug, Clone)]
pub struct DislocationNode {
    pub segment: SegmentId,
    pub opposite_node: NodeId,
    pub junction_ring: NodeId,
    /// The Burgers circuit bound to this node during tracing.
    pub circuit: Option<CircuitId>,
}

/// One dislocation line: a polyline with a Burgers vector in a cluster's
/// local frame and an endpoint node at each end. `nodes[0]` is the
/// forward node (end of `line`), `nodes[1]` the backward node (start).
#[derive(Debug, Clone)]
pub struct DislocationSegment {
    pub id: usize,
    pub line: VecDeque<Point3<f64>>,
    /// Per-point count of mesh edges in the generating circuit; cleared
    /// by smoothing.
    pub core_size: VecDeque<u32>,
    pub burgers_vector: ClusterVector,
    pub nodes: [NodeId; 2],
    pub replaced_with: Option<SegmentId>,
    discarded: bool,
}

/// The set of dislocation segments extracted from one frame, sharing the
/// cluster graph their Burgers vectors are expressed in.
#[derive(Debug, Clone, Default)]
pub struct DislocationNetwork {
    pub segments: Vec<DislocationSegment>,
    pub nodes: Vec<DislocationNode>,
}

impl DislocationNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a segment with two fresh dangling nodes.
    pub fn create_segment(&mut self, burgers_vector: ClusterVector) -> SegmentId {
        debug_assert!(burgers_vector.vec.norm_squared() > 0.0);
        let segment = self.segments.len();
        let forward = self.nodes.len();
        let backward = forward + 1;
        self.nodes.push(DislocationNode {
            segment,
            opposite_node: backward,
            junction_ring: forward,
            circuit: None,
        });
        self.nodes.push(DislocationNode {
            segment,
            opposite_node: forward,
            junction_ring: backward,
            circuit: None,
        });
        self.segments.push(DislocationSegment {
            id: segment,
            line: VecDeque::new(),
            core_size: VecDeque::new(),
            burgers_vector,
            nodes: [forward, backward],
            replaced_with: None,
            discarded: false,
        });
        segment
    }

    pub fn is_forward_node(&self, node: NodeId) -> bool {
        self.segments[self.nodes[node].segment].nodes[0] == node
    }

    /// Signed Burgers vector at a node: the segment's vector at the
    /// forward end, its negative at the backward end.
    pub fn node_burgers_vector(&self, node: NodeId) -> ClusterVector {
        let segment = &self.segments[self.nodes[node].segment];
        if self.is_forward_node(node) {
            segment.burgers_vector
        } else {
            segment.burgers_vector.negated()
        }
    }

    /// Position of a node: the matching end of its segment's polyline.
    pub fn node_position(&self, node: NodeId) -> Point3<f64> {
        let segment = &self.segments[self.nodes[node].segment];
        if self.is_forward_node(node) {
            *segment.line.back().expect("segment line is never empty")
        } else {
            *segment.line.front().expect("segment line is never empty")
        }
    }

    pub fn is_dangling(&self, node: NodeId) -> bool {
        self.nodes[node].junction_ring == node
    }

    /// Ring-walk co-membership test.
    pub fn forms_junction_with(&self, node: NodeId, other: NodeId) -> bool {
        let mut current = self.nodes[node].junction_ring;
        loop {
            if current == other {
                return true;
            }
            if current == node {
                return false;
            }
            current = self.nodes[current].junction_ring;
        }
    }

    /// Splices two junction rings (or two dangling nodes) into one ring.
    pub fn connect_nodes(&mut self, a: NodeId, b: NodeId) {
        debug_assert!(!self.forms_junction_with(a, b));
        let ring_a = self.nodes[a].junction_ring;
        let ring_b = self.nodes[b].junction_ring;
        self.nodes[a].junction_ring = ring_b;
        self.nodes[b].junction_ring = ring_a;
        debug_assert!(self.forms_junction_with(a, b));
        debug_assert!(self.forms_junction_with(b, a));
    }

    /// Returns every node of a junction ring to the dangling state.
    pub fn dissolve_junction(&mut self, node: NodeId) {
        let mut current = self.nodes[node].junction_ring;
        while current != node {
            let next = self.nodes[current].junction_ring;
            self.nodes[current].junction_ring = current;
            current = next;
        }
        self.nodes[node].junction_ring = node;
    }

    pub fn count_junction_arms(&self, node: NodeId) -> usize {
        let mut count = 1;
        let mut current = self.nodes[node].junction_ring;
        while current != node {
            count += 1;
            current = self.nodes[current].junction_ring;
        }
        count
    }

    /// A segment is a closed loop when its two nodes form a two-ring with
    /// each other.
    pub fn is_closed_loop(&self, segment: SegmentId) -> bool {
        let [forward, backward] = self.segments[segment].nodes;
        self.nodes[forward].junction_ring == backward
            && self.nodes[backward].junction_ring == forward
    }

    /// A closed loop whose polyline endpoints do not coincide closes only
    /// through the periodic boundary.
    pub fn is_infinite_line(&self, segment: SegmentId) -> bool {
        if !self.is_closed_loop(segment) {
            return false;
        }
        let line = &self.segments[segment].line;
        match (line.front(), line.back()) {
            (Some(front), Some(back)) => (front - back).norm() > ATOM_VECTOR_EPSILON,
            _ => false,
        }
    }

    pub fn segment_length(&self, segment: SegmentId) -> f64 {
        let line = &self.segments[segment].line;
        line.iter()
            .zip(line.iter().skip(1))
            .map(|(a, b)| (b - a).norm())
            .sum()
    }

    /// Point at arc-length parameter `t` in [0, 1] along a segment.
    pub fn point_on_line(&self, segment: SegmentId, t: f64) -> Point3<f64> {
        let line = &self.segments[segment].line;
        if line.len() < 2 {
            return line.front().copied().unwrap_or_else(Point3::origin);
        }
        let target = t * self.segment_length(segment);
        let mut travelled = 0.0;
        for (a, b) in line.iter().zip(line.iter().skip(1)) {
            let step = (b - a).norm();
            if step > 0.0 && travelled + step >= target {
                return a + ((target - travelled) / step) * (b - a);
            }
            travelled += step;
        }
        *line.back().unwrap()
    }

    /// Flags a segment as discarded and removes its nodes from any
    /// junction rings. Storage is reclaimed by `compact`.
    pub fn discard_segment(&mut self, segment: SegmentId) {
        for node in self.segments[segment].nodes {
            self.remove_from_ring(node);
        }
        self.segments[segment].discarded = true;
    }

    fn remove_from_ring(&mut self, node: NodeId) {
        if self.is_dangling(node) {
            return;
        }
        // Find the predecessor and bridge over this node.
        let mut prev = node;
        while self.nodes[prev].junction_ring != node {
            prev = self.nodes[prev].junction_ring;
        }
        self.nodes[prev].junction_ring = self.nodes[node].junction_ring;
        self.nodes[node].junction_ring = node;
    }

    /// Drops discarded segments and renumbers the survivors (and their
    /// nodes) densely, preserving junction topology.
    pub fn compact(&mut self) {
        let mut segment_map: Vec<Option<SegmentId>> = vec![None; self.segments.len()];
        let mut node_map: Vec<Option<NodeId>> = vec![None; self.nodes.len()];

        let mut new_segments = Vec::new();
        let mut new_nodes = Vec::new();
        for (old_id, segment) in self.segments.iter().enumerate() {
            if segment.discarded {
                continue;
            }
            let new_id = new_segments.len();
            segment_map[old_id] = Some(new_id);
            for &node in &segment.nodes {
                node_map[node] = Some(new_nodes.len());
                new_nodes.push(self.nodes[node].clone());
            }
            let mut segment = segment.clone();
            segment.id = new_id;
            new_segments.push(segment);
        }

        for segment in &mut new_segments {
            for node in &mut segment.nodes {
                *node = node_map[*node].expect("kept segment's nodes survive");
            }
        }
        for node in &mut new_nodes {
            node.segment = segment_map[node.segment].expect("kept node's segment survives");
            node.opposite_node = node_map[node.opposite_node].expect("opposite node survives");
            // Junction partners may have been discarded; they were
            // dissolved out of rings beforehand.
            node.junction_ring = node_map[node.junction_ring].expect("ring member survives");
        }

        self.segments = new_segments;
        self.nodes = new_nodes;
    }

    /// Total line length over all retained segments.
    pub fn total_line_length(&self) -> f64 {
        (0..self.segments.len())
            .filter(|&s| !self.segments[s].discarded)
            .map(|s| self.segment_length(s))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::ClusterVector;
    use nalgebra::Vector3;

    fn make_network_with(n: usize) -> DislocationNetwork {
        let mut network = DislocationNetwork::new();
        for _ in 0..n {
            let s = network.create_segment(ClusterVector::new(Vector3::new(0.5, 0.0, 0.5), 1));
            network.segments[s]
                .line
                .extend([Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        }
        network
    }

    #[test]
    fn fresh_nodes_are_dangling() {
        let network = make_network_with(1);
        assert!(network.is_dangling(0));
        assert!(network.is_dangling(1));
        assert!(!network.is_closed_loop(0));
    }

    #[test]
    fn connecting_both_ends_forms_a_loop() {
        let mut network = make_network_with(1);
        let [forward, backward] = network.segments[0].nodes;
        network.connect_nodes(forward, backward);
        assert!(network.is_closed_loop(0));
        assert!(network.is_infinite_line(0)); // endpoints differ
    }

    #[test]
    fn junction_ring_membership_is_symmetric() {
        let mut network = make_network_with(3);
        let n0 = network.segments[0].nodes[0];
        let n1 = network.segments[1].nodes[0];
        let n2 = network.segments[2].nodes[0];
        network.connect_nodes(n0, n1);
        network.connect_nodes(n0, n2);
        assert_eq!(network.count_junction_arms(n0), 3);
        assert!(network.forms_junction_with(n1, n2));
        assert!(network.forms_junction_with(n2, n0));

        network.dissolve_junction(n0);
        assert!(network.is_dangling(n0));
        assert!(network.is_dangling(n1));
        assert!(network.is_dangling(n2));
    }

    #[test]
    fn discard_and_compact_renumber_cleanly() {
        let mut network = make_network_with(3);
        let keep_a = network.segments[0].nodes[0];
        let keep_b = network.segments[2].nodes[0];
        network.connect_nodes(keep_a, keep_b);

        network.discard_segment(1);
        network.compact();
        assert_eq!(network.segments.len(), 2);
        assert_eq!(network.segments[0].id, 0);
        assert_eq!(network.segments[1].id, 1);
        // The junction between the two survivors is intact.
        let a = network.segments[0].nodes[0];
        let b = network.segments[1].nodes[0];
        assert!(network.forms_junction_with(a, b));
    }

    #[test]
    fn point_on_line_interpolates() {
        let mut network = make_network_with(1);
        network.segments[0].line = VecDeque::from(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ]);
        let mid = network.point_on_line(0, 0.5);
        assert!((mid - Point3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }
}
