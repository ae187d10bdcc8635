use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::{Matrix3, Point3, Vector3};
use rand::Rng;

use crate::core::cluster::{ClusterGraph, ClusterVector};
use crate::core::dislocations::{DislocationNetwork, NodeId};
use crate::core::{LATTICE_VECTOR_EPSILON, TRANSITION_MATRIX_EPSILON};
use crate::geometry::halfedge::{CircuitId, HalfEdgeId, HalfEdgeMesh};

/// A closed ring of mesh half-edges encircling a dislocation line. The
/// ring is threaded through the mesh edges' `next_circuit_edge` links.
#[derive(Debug, Clone)]
pub struct BurgersCircuit {
    pub first_edge: HalfEdgeId,
    pub edge_count: usize,
    /// Snapshot of the ring taken when tracing stops, used to cap the
    /// defect mesh at dangling ends.
    pub segment_mesh_cap: Vec<HalfEdgeId>,
    pub node: NodeId,
    pub is_completely_blocked: bool,
    pub is_dangling: bool,
}

/// Discovers trial Burgers circuits on the interface mesh, extends them
/// along the dislocation lines, and sews the resulting segments into a
/// dislocation network with junction topology.
pub struct BurgersCircuitTracer<'a> {
    mesh: &'a mut HalfEdgeMesh,
    graph: &'a mut ClusterGraph,
    network: DislocationNetwork,
    circuits: Vec<BurgersCircuit>,
    max_circuit_size: usize,
    max_extended_circuit_size: usize,
    /// Outgoing half-edges per mesh vertex; the mesh topology is frozen
    /// during tracing.
    vertex_out: Vec<Vec<u32>>,
}

impl<'a> BurgersCircuitTracer<'a> {
    pub fn new(
        mesh: &'a mut HalfEdgeMesh,
        graph: &'a mut ClusterGraph,
        max_circuit_size: usize,
        max_extended_circuit_size: usize,
    ) -> Self {
        let mut vertex_out: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertex_count()];
        for (i, edge) in mesh.edges.iter().enumerate() {
            vertex_out[edge.vertex1].push(i as u32);
        }
        Self {
            mesh,
            graph,
            network: DislocationNetwork::new(),
            circuits: Vec::new(),
            max_circuit_size: max_circuit_size.max(3),
            max_extended_circuit_size: max_extended_circuit_size.max(max_circuit_size),
            vertex_out,
        }
    }

    /// Runs all tracing phases and returns the finished network.
    pub fn trace(mut self, rng: &mut impl Rng) -> TracerOutput {
        self.find_primary_segments(rng);
        self.trace_segments();
        self.join_segments();
        self.finish();

        let dangling_nodes: Vec<NodeId> = (0..self.network.nodes.len())
            .filter(|&n| self.network.is_dangling(n))
            .collect();
        let caps = dangling_nodes
            .iter()
            .filter_map(|&n| {
                let circuit = self.network.nodes[n].circuit?;
                let cap = self.circuits[circuit].segment_mesh_cap.clone();
                if cap.len() < 2 {
                    return None;
                }
                Some((self.network.node_position(n), cap))
            })
            .collect();

        info!(
            "dislocation tracer: {} segments, {} dangling nodes",
            self.network.segments.len(),
            dangling_nodes.len()
        );

        TracerOutput {
            network: self.network,
            dangling_nodes,
            caps,
        }
    }

    // --- Phase 1: primary segment discovery ---

    /// Scans the mesh half-edges, starting at a randomized offset, and
    /// spawns a dislocation segment for every acceptable trial circuit.
    fn find_primary_segments(&mut self, rng: &mut impl Rng) {
        let edge_count = self.mesh.edge_count();
        if edge_count == 0 {
            return;
        }
        let offset = rng.gen_range(0..edge_count);
        for i in 0..edge_count {
            let edge = (offset + i) % edge_count;
            if self.mesh.edges[edge].circuit.is_some() {
                continue;
            }
            self.try_create_circuit(edge, self.max_circuit_size);
        }
        debug!(
            "primary segment search: {} segments",
            self.network.segments.len()
        );
    }

    /// Attempts to close a trial circuit through `seed`: a bounded
    /// breadth-first walk from the seed's head carries an accumulated
    /// lattice coordinate; an arrival back at the seed's tail whose
    /// accumulated ideal-vector sum does not cancel closes a circuit with
    /// a non-trivial Burgers vector.
    fn try_create_circuit(&mut self, seed: HalfEdgeId, max_size: usize) {
        let v_start = self.mesh.edges[seed].vertex1;
        let v_head = self.mesh.edges[seed].vertex2;
        let seed_transition = self.mesh.edges[seed].cluster_transition;

        // Per-vertex BFS state: predecessor edge, depth, and the walk's
        // lattice coordinate / accumulated transform in the start frame.
        let mut predecessor: Vec<Option<HalfEdgeId>> = vec![None; self.mesh.vertex_count()];
        let mut depth: Vec<usize> = vec![usize::MAX; self.mesh.vertex_count()];
        let mut coords: Vec<(Vector3<f64>, Matrix3<f64>)> =
            vec![(Vector3::zeros(), Matrix3::identity()); self.mesh.vertex_count()];
        let mut queue = std::collections::VecDeque::new();

        depth[v_head] = 0;
        coords[v_head] = (
            self.mesh.edges[seed].cluster_vector,
            if self.graph.is_self_transition(seed_transition) {
                Matrix3::identity()
            } else {
                self.graph
                    .transition(self.graph.transition(seed_transition).reverse)
                    .tm
            },
        );
        queue.push_back(v_head);

        let mut closing_edge: Option<HalfEdgeId> = None;
        'bfs: while let Some(v) = queue.pop_front() {
            if depth[v] + 2 > max_size {
                continue;
            }
            let (coord, accum) = coords[v];
            for e in self.vertex_out_edges(v) {
                if e == seed || Some(e) == self.mesh.edges[seed].opposite {
                    continue;
                }
                if self.mesh.edges[e].circuit.is_some() {
                    continue;
                }
                let to = self.mesh.edges[e].vertex2;
                let step_coord = coord + accum * self.mesh.edges[e].cluster_vector;
                if to == v_start {
                    // Closure: non-zero lattice sum and identity rotation.
                    let t = self.mesh.edges[e].cluster_transition;
                    let total = if self.graph.is_self_transition(t) {
                        accum
                    } else {
                        accum * self.graph.transition(self.graph.transition(t).reverse).tm
                    };
                    if step_coord.norm() >= LATTICE_VECTOR_EPSILON
                        && matrix_is_identity(&total, TRANSITION_MATRIX_EPSILON)
                    {
                        closing_edge = Some(e);
                        break 'bfs;
                    }
                    continue;
                }
                if depth[to] != usize::MAX {
                    continue;
                }
                let t = self.mesh.edges[e].cluster_transition;
                let step_accum = if self.graph.is_self_transition(t) {
                    accum
                } else {
                    accum * self.graph.transition(self.graph.transition(t).reverse).tm
                };
                depth[to] = depth[v] + 1;
                predecessor[to] = Some(e);
                coords[to] = (step_coord, step_accum);
                queue.push_back(to);
            }
        }
        let Some(closing_edge) = closing_edge else {
            return;
        };

        // Reconstruct the ring: seed, the tree path, the closing edge.
        let mut path = vec![closing_edge];
        let mut v = self.mesh.edges[closing_edge].vertex1;
        while v != v_head {
            let e = predecessor[v].expect("path reconstruction");
            path.push(e);
            v = self.mesh.edges[e].vertex1;
        }
        path.reverse();
        let mut ring = vec![seed];
        ring.extend(path);

        if ring.len() < 3 || ring.len() > max_size {
            return;
        }

        // Recompute through the canonical rule as a consistency check.
        let Some(burgers) = self.ring_burgers_vector(&ring) else {
            return;
        };
        if burgers.vec.norm() < LATTICE_VECTOR_EPSILON {
            return;
        }

        // Reject circuits that intersect a previously accepted circuit:
        // the breadth-first walk already avoids owned edges, but a trial
        // ring can still cross an existing one transversally at a shared
        // vertex.
        if self.circuit_crosses_existing(&ring) {
            return;
        }

        // The backward circuit runs over the opposite half-edges; all of
        // them must exist and be free.
        let mut reverse_ring = Vec::with_capacity(ring.len());
        for &e in ring.iter().rev() {
            match self.mesh.edges[e].opposite {
                Some(op) if self.mesh.edges[op].circuit.is_none() => reverse_ring.push(op),
                _ => return,
            }
        }

        // Materialize both circuits and the segment between them.
        let segment = self.network.create_segment(burgers);
        let [forward_node, backward_node] = self.network.segments[segment].nodes;

        let forward = self.alloc_circuit(&ring, forward_node);
        let backward = self.alloc_circuit(&reverse_ring, backward_node);
        self.network.nodes[forward_node].circuit = Some(forward);
        self.network.nodes[backward_node].circuit = Some(backward);

        let forward_center = self.circuit_center(forward);
        let backward_center = self.circuit_center(backward);
        let segment = &mut self.network.segments[segment];
        segment.line.push_back(backward_center);
        segment.line.push_back(forward_center);
        segment.core_size.push_back(self.circuits[backward].edge_count as u32);
        segment.core_size.push_back(self.circuits[forward].edge_count as u32);
    }

    fn vertex_out_edges(&self, v: usize) -> Vec<HalfEdgeId> {
        self.vertex_out[v].iter().map(|&e| e as usize).collect()
    }

    fn alloc_circuit(&mut self, ring: &[HalfEdgeId], node: NodeId) -> CircuitId {
        let id = self.circuits.len();
        for (i, &e) in ring.iter().enumerate() {
            let next = ring[(i + 1) % ring.len()];
            self.mesh.edges[e].circuit = Some(id);
            self.mesh.edges[e].next_circuit_edge = Some(next);
        }
        self.circuits.push(BurgersCircuit {
            first_edge: ring[0],
            edge_count: ring.len(),
            segment_mesh_cap: Vec::new(),
            node,
            is_completely_blocked: false,
            is_dangling: true,
        });
        id
    }

    /// Burgers vector of an edge ring per the accumulated-transform rule:
    /// `b = sum_k T_k v_k` with `T_1 = I` and `T_{k+1} = T_k *
    /// t_k.reverse.tm`, expressed in the first edge's cluster frame.
    /// Returns `None` when the composed transitions do not close to the
    /// identity.
    fn ring_burgers_vector(&self, ring: &[HalfEdgeId]) -> Option<ClusterVector> {
        let mut b = Vector3::zeros();
        let mut accum = Matrix3::identity();
        for &e in ring {
            let edge = &self.mesh.edges[e];
            b += accum * edge.cluster_vector;
            let t = edge.cluster_transition;
            if !self.graph.is_self_transition(t) {
                let reverse = self.graph.transition(t).reverse;
                accum *= self.graph.transition(reverse).tm;
            }
        }
        if !matrix_is_identity(&accum, TRANSITION_MATRIX_EPSILON) {
            return None;
        }
        let first = &self.mesh.edges[ring[0]];
        let cluster = self.graph.transition(first.cluster_transition).cluster1;
        Some(ClusterVector::new(b, cluster))
    }

    /// Geometric center of a circuit: mean of the running prefix sums of
    /// its physical vectors, anchored at the first edge's tail.
    fn circuit_center(&self, circuit: CircuitId) -> Point3<f64> {
        let c = &self.circuits[circuit];
        let mut center = Vector3::zeros();
        let mut current = Vector3::zeros();
        let mut e = c.first_edge;
        loop {
            center += current;
            current += self.mesh.edges[e].physical_vector;
            e = self.mesh.edges[e].next_circuit_edge.expect("closed ring");
            if e == c.first_edge {
                break;
            }
        }
        let anchor = self.mesh.vertices[self.mesh.edges[c.first_edge].vertex1].pos;
        anchor + center / c.edge_count as f64
    }

    fn ring_edges(&self, circuit: CircuitId) -> Vec<HalfEdgeId> {
        let c = &self.circuits[circuit];
        let mut out = Vec::with_capacity(c.edge_count);
        let mut e = c.first_edge;
        loop {
            out.push(e);
            e = self.mesh.edges[e].next_circuit_edge.expect("closed ring");
            if e == c.first_edge {
                break;
            }
        }
        out
    }

    /// Chord-crossing topology test against every accepted circuit: at
    /// each mesh vertex the trial ring shares with an existing ring, the
    /// two-edge passages of both circuits are located in the cyclic edge
    /// fan around the vertex; interleaved passages cross.
    fn circuit_crosses_existing(&self, ring: &[HalfEdgeId]) -> bool {
        if self.circuits.is_empty() {
            return false;
        }

        // Passages (incoming edge, outgoing edge) of the accepted
        // circuits, keyed by the mesh vertex they pivot on.
        let mut passages: HashMap<usize, Vec<(HalfEdgeId, HalfEdgeId)>> = HashMap::new();
        for circuit in 0..self.circuits.len() {
            let existing = self.ring_edges(circuit);
            let n = existing.len();
            for i in 0..n {
                let e_in = existing[i];
                let e_out = existing[(i + 1) % n];
                let v = self.mesh.edges[e_out].vertex1;
                passages.entry(v).or_default().push((e_in, e_out));
            }
        }

        let n = ring.len();
        for i in 0..n {
            let a_in = ring[i];
            let a_out = ring[(i + 1) % n];
            let v = self.mesh.edges[a_out].vertex1;
            let Some(existing) = passages.get(&v) else {
                continue;
            };
            for &(b_in, b_out) in existing {
                if self.passages_cross(v, a_in, a_out, b_in, b_out) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether two circuit passages through vertex `v` interleave in the
    /// rotational order of edges around it. Shared fan slots count as an
    /// intersection as well.
    fn passages_cross(
        &self,
        v: usize,
        a_in: HalfEdgeId,
        a_out: HalfEdgeId,
        b_in: HalfEdgeId,
        b_out: HalfEdgeId,
    ) -> bool {
        let Some(fan) = self.vertex_fan(v) else {
            // Open one-ring: the rotational order is ambiguous, so the
            // passages can only touch, not provably cross.
            return false;
        };
        let position = |e: Option<HalfEdgeId>| -> Option<usize> {
            let e = e?;
            fan.iter().position(|&f| f == e)
        };
        let (Some(a1), Some(a2), Some(b1), Some(b2)) = (
            position(Some(a_out)),
            position(self.mesh.edges[a_in].opposite),
            position(Some(b_out)),
            position(self.mesh.edges[b_in].opposite),
        ) else {
            return false;
        };

        if a1 == b1 || a1 == b2 || a2 == b1 || a2 == b2 {
            return true;
        }

        // The chords {a1, a2} and {b1, b2} cross iff exactly one endpoint
        // of b lies on the open arc from a1 to a2.
        let in_arc = |x: usize| -> bool {
            let mut i = (a1 + 1) % fan.len();
            while i != a2 {
                if i == x {
                    return true;
                }
                i = (i + 1) % fan.len();
            }
            false
        };
        in_arc(b1) != in_arc(b2)
    }

    /// Outgoing half-edges around a vertex in rotational order, or `None`
    /// when the one-ring is open at a mesh boundary.
    fn vertex_fan(&self, v: usize) -> Option<Vec<HalfEdgeId>> {
        let first = *self.vertex_out.get(v)?.first()? as usize;
        let mut fan = Vec::with_capacity(self.vertex_out[v].len());
        let mut current = first;
        loop {
            fan.push(current);
            // Rotate by one face: the face edge arriving at v flips into
            // the next outgoing edge.
            let incoming = self.mesh.prev_face_edge(current);
            let next = self.mesh.edges[incoming].opposite?;
            if next == first {
                break;
            }
            if fan.len() >= self.vertex_out[v].len() {
                return None;
            }
            current = next;
        }
        Some(fan)
    }

    // --- Phase 2: segment tracing ---

    /// Repeatedly advances every dangling circuit by local moves until no
    /// circuit can move anymore.
    fn trace_segments(&mut self) {
        let move_budget = self.mesh.face_count() * 2 + 16;
        for circuit in 0..self.circuits.len() {
            let mut moves = 0;
            while moves < move_budget && self.advance_circuit(circuit) {
                moves += 1;
                self.append_line_point(circuit);
            }
            self.classify_terminus(circuit);
        }
    }

    /// Tries each local move at each ring position, in the fixed move
    /// order; applies the first one that fits. Returns whether the
    /// circuit advanced.
    fn advance_circuit(&mut self, circuit: CircuitId) -> bool {
        let ring = self.ring_edges(circuit);
        let len = ring.len();
        for i in 0..len {
            let prev = ring[i];
            let e0 = ring[(i + 1) % len];
            let e1 = ring[(i + 2) % len];
            let e2 = ring[(i + 3) % len];

            if self.try_remove_two_edges(circuit, prev, e0, e1, e2) {
                return true;
            }
            if self.try_remove_three_edges(circuit, prev, e0, e1, e2) {
                return true;
            }
            if self.try_remove_one_edge(circuit, prev, e0, e1, e2) {
                return true;
            }
            if self.try_sweep_two_facets(circuit, prev, e0, e1, e2) {
                return true;
            }
            if self.try_insert_one_edge(circuit, prev, e0, e1) {
                return true;
            }
        }
        false
    }

    /// Whether a half-edge may join this circuit's ring.
    fn edge_is_free(&self, e: HalfEdgeId) -> bool {
        self.mesh.edges[e].circuit.is_none()
    }

    fn face_is_free(&self, f: usize) -> bool {
        self.mesh.faces[f].circuit.is_none()
    }

    fn adopt_edge(&mut self, circuit: CircuitId, e: HalfEdgeId) {
        self.mesh.edges[e].circuit = Some(circuit);
    }

    fn sweep_face(&mut self, circuit: CircuitId, f: usize) {
        self.mesh.faces[f].circuit = Some(circuit);
    }

    /// Splices `replacement` between `prev` and `after` and fixes the
    /// circuit bookkeeping.
    fn splice(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        replaced: &[HalfEdgeId],
        replacement: &[HalfEdgeId],
        after: HalfEdgeId,
    ) {
        let mut cursor = prev;
        for &e in replacement {
            self.mesh.edges[cursor].next_circuit_edge = Some(e);
            cursor = e;
            self.adopt_edge(circuit, e);
        }
        self.mesh.edges[cursor].next_circuit_edge = Some(after);

        let c = &mut self.circuits[circuit];
        c.edge_count = c.edge_count + replacement.len() - replaced.len();
        if replaced.contains(&c.first_edge) {
            c.first_edge = prev;
        }
    }

    /// Shortcut across the single face behind two consecutive edges:
    /// A->B, B->C collapse to the face's third edge A->C.
    fn try_remove_two_edges(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        e0: HalfEdgeId,
        e1: HalfEdgeId,
        e2: HalfEdgeId,
    ) -> bool {
        if self.circuits[circuit].edge_count < 4 {
            return false;
        }
        let (Some(op0), Some(op1)) = (self.mesh.edges[e0].opposite, self.mesh.edges[e1].opposite)
        else {
            return false;
        };
        if self.mesh.edges[op0].face != self.mesh.edges[op1].face {
            return false;
        }
        let face = self.mesh.edges[op0].face;
        if !self.face_is_free(face) {
            return false;
        }
        let shortcut = self.mesh.next_face_edge(op0);
        if shortcut == op1 || !self.edge_is_free(shortcut) {
            return false;
        }
        debug_assert_eq!(self.mesh.edges[shortcut].vertex1, self.mesh.edges[e0].vertex1);
        debug_assert_eq!(self.mesh.edges[shortcut].vertex2, self.mesh.edges[e1].vertex2);

        self.splice(circuit, prev, &[e0, e1], &[shortcut], e2);
        self.sweep_face(circuit, face);
        true
    }

    /// Replaces three consecutive circuit edges by one shortcut edge when
    /// a single mesh face subtends all three. Either the circuit walks a
    /// face's full reversed boundary (the detour contracts away), or the
    /// far side of the three edges is a diagonal-split quadrilateral that
    /// collapses onto its fourth side.
    fn try_remove_three_edges(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        e0: HalfEdgeId,
        e1: HalfEdgeId,
        e2: HalfEdgeId,
    ) -> bool {
        let (Some(op0), Some(op1), Some(op2)) = (
            self.mesh.edges[e0].opposite,
            self.mesh.edges[e1].opposite,
            self.mesh.edges[e2].opposite,
        ) else {
            return false;
        };
        let f0 = self.mesh.edges[op0].face;
        let f1 = self.mesh.edges[op1].face;
        let f2 = self.mesh.edges[op2].face;
        let after = self.mesh.edges[e2].next_circuit_edge.expect("closed ring");

        // One face subtends all three edges directly: the circuit runs the
        // face's reversed boundary and the triangular detour vanishes.
        if f0 == f1 && f1 == f2 {
            if self.circuits[circuit].edge_count < 6 || !self.face_is_free(f0) {
                return false;
            }
            debug_assert_eq!(
                self.mesh.edges[e0].vertex1,
                self.mesh.edges[e2].vertex2
            );
            self.splice(circuit, prev, &[e0, e1, e2], &[], after);
            self.sweep_face(circuit, f0);
            return true;
        }

        if self.circuits[circuit].edge_count < 5 {
            return false;
        }

        // The first two far edges share a face, whose diagonal leads into
        // the face holding the third; the shortcut is that face's
        // remaining edge.
        if f0 == f1 && f2 != f0 && self.face_is_free(f0) && self.face_is_free(f2) {
            let diagonal = self.mesh.next_face_edge(op0);
            if self.mesh.edges[diagonal].opposite == Some(self.mesh.next_face_edge(op2)) {
                let shortcut = self.mesh.prev_face_edge(op2);
                if self.edge_is_free(shortcut) {
                    debug_assert_eq!(
                        self.mesh.edges[shortcut].vertex1,
                        self.mesh.edges[e0].vertex1
                    );
                    debug_assert_eq!(
                        self.mesh.edges[shortcut].vertex2,
                        self.mesh.edges[e2].vertex2
                    );
                    self.splice(circuit, prev, &[e0, e1, e2], &[shortcut], after);
                    self.sweep_face(circuit, f0);
                    self.sweep_face(circuit, f2);
                    return true;
                }
            }
        }

        // Mirror configuration: the last two far edges share the face and
        // the shortcut lives in the face behind the first edge.
        if f1 == f2 && f0 != f1 && self.face_is_free(f0) && self.face_is_free(f1) {
            let diagonal = self.mesh.next_face_edge(op1);
            if self.mesh.edges[diagonal].opposite == Some(self.mesh.prev_face_edge(op0)) {
                let shortcut = self.mesh.next_face_edge(op0);
                if self.edge_is_free(shortcut) {
                    debug_assert_eq!(
                        self.mesh.edges[shortcut].vertex1,
                        self.mesh.edges[e0].vertex1
                    );
                    debug_assert_eq!(
                        self.mesh.edges[shortcut].vertex2,
                        self.mesh.edges[e2].vertex2
                    );
                    self.splice(circuit, prev, &[e0, e1, e2], &[shortcut], after);
                    self.sweep_face(circuit, f0);
                    self.sweep_face(circuit, f1);
                    return true;
                }
            }
        }

        false
    }

    /// Bends inward across the circuit's own face: two consecutive edges
    /// of one face are replaced by the opposite of that face's third
    /// edge.
    fn try_remove_one_edge(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        e0: HalfEdgeId,
        e1: HalfEdgeId,
        e2: HalfEdgeId,
    ) -> bool {
        if self.circuits[circuit].edge_count < 4 {
            return false;
        }
        if self.mesh.edges[e0].face != self.mesh.edges[e1].face
            || self.mesh.next_face_edge(e0) != e1
        {
            return false;
        }
        let face = self.mesh.edges[e0].face;
        if !self.face_is_free(face) {
            return false;
        }
        let third = self.mesh.prev_face_edge(e0);
        let Some(shortcut) = self.mesh.edges[third].opposite else {
            return false;
        };
        if !self.edge_is_free(shortcut) {
            return false;
        }

        self.splice(circuit, prev, &[e0, e1], &[shortcut], e2);
        self.sweep_face(circuit, face);
        true
    }

    /// Rotates the circuit across two adjacent outside faces sharing an
    /// apex vertex: A->B, B->C become A->X, X->C.
    fn try_sweep_two_facets(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        e0: HalfEdgeId,
        e1: HalfEdgeId,
        e2: HalfEdgeId,
    ) -> bool {
        let (Some(op0), Some(op1)) = (self.mesh.edges[e0].opposite, self.mesh.edges[e1].opposite)
        else {
            return false;
        };
        let face0 = self.mesh.edges[op0].face;
        let face1 = self.mesh.edges[op1].face;
        if face0 == face1 || !self.face_is_free(face0) || !self.face_is_free(face1) {
            return false;
        }
        let s1 = self.mesh.next_face_edge(op0);
        let s2 = self.mesh.prev_face_edge(op1);
        if self.mesh.edges[s1].vertex2 != self.mesh.edges[s2].vertex1 {
            return false;
        }
        if !self.edge_is_free(s1) || !self.edge_is_free(s2) {
            return false;
        }

        self.splice(circuit, prev, &[e0, e1], &[s1, s2], e2);
        self.sweep_face(circuit, face0);
        self.sweep_face(circuit, face1);
        true
    }

    /// Bends the circuit around the far vertex of the outside face behind
    /// one edge: A->B becomes A->X, X->B.
    fn try_insert_one_edge(
        &mut self,
        circuit: CircuitId,
        prev: HalfEdgeId,
        e0: HalfEdgeId,
        e1: HalfEdgeId,
    ) -> bool {
        if self.circuits[circuit].edge_count + 1 > self.max_extended_circuit_size {
            return false;
        }
        let Some(op0) = self.mesh.edges[e0].opposite else {
            return false;
        };
        let face = self.mesh.edges[op0].face;
        if !self.face_is_free(face) {
            return false;
        }
        let s1 = self.mesh.next_face_edge(op0);
        let s2 = self.mesh.next_face_edge(s1);
        if !self.edge_is_free(s1) || !self.edge_is_free(s2) {
            return false;
        }

        self.splice(circuit, prev, &[e0], &[s1, s2], e1);
        self.sweep_face(circuit, face);
        true
    }

    /// Appends the circuit's new center to its segment's polyline: head
    /// extensions push to the back, tail extensions to the front.
    fn append_line_point(&mut self, circuit: CircuitId) {
        let center = self.circuit_center(circuit);
        let node = self.circuits[circuit].node;
        let edge_count = self.circuits[circuit].edge_count as u32;
        let segment_id = self.network.nodes[node].segment;
        let is_forward = self.network.is_forward_node(node);
        let segment = &mut self.network.segments[segment_id];
        if is_forward {
            segment.line.push_back(center);
            segment.core_size.push_back(edge_count);
        } else {
            segment.line.push_front(center);
            segment.core_size.push_front(edge_count);
        }
    }

    /// Marks a stalled circuit as completely blocked when no foreign
    /// circuit touches it (the alternative terminus is a junction).
    fn classify_terminus(&mut self, circuit: CircuitId) {
        let mut foreign_contact = false;
        for e in self.ring_edges(circuit) {
            if let Some(op) = self.mesh.edges[e].opposite {
                if let Some(other) = self.mesh.edges[op].circuit {
                    if other != circuit {
                        foreign_contact = true;
                        break;
                    }
                }
            }
        }
        self.circuits[circuit].is_completely_blocked = !foreign_contact;
    }

    // --- Phase 3: joining and junction formation ---

    /// Sews dangling ends that meet on the mesh: pairwise opposite-edge
    /// contact first (two matching circuits), then junction rings around
    /// shared mesh vertices. Checks Burgers conservation per junction.
    fn join_segments(&mut self) {
        let count = self.circuits.len();

        // Opposite-edge contact.
        for a in 0..count {
            for b in (a + 1)..count {
                if !self.nodes_connectable(a, b) {
                    continue;
                }
                if self.circuits_share_opposite_edge(a, b) {
                    let na = self.circuits[a].node;
                    let nb = self.circuits[b].node;
                    self.network.connect_nodes(na, nb);
                }
            }
        }

        // Shared-vertex junctions among the still-dangling remainder.
        for a in 0..count {
            for b in (a + 1)..count {
                if !self.nodes_connectable(a, b) {
                    continue;
                }
                if self.circuits_share_vertex(a, b) {
                    let na = self.circuits[a].node;
                    let nb = self.circuits[b].node;
                    self.network.connect_nodes(na, nb);
                }
            }
        }

        self.verify_junction_sums();
    }

    fn nodes_connectable(&self, a: CircuitId, b: CircuitId) -> bool {
        let na = self.circuits[a].node;
        let nb = self.circuits[b].node;
        na != nb && !self.network.forms_junction_with(na, nb)
    }

    fn circuits_share_opposite_edge(&self, a: CircuitId, b: CircuitId) -> bool {
        let ring_b = self.ring_edges(b);
        for e in self.ring_edges(a) {
            if let Some(op) = self.mesh.edges[e].opposite {
                if ring_b.contains(&op) {
                    return true;
                }
            }
        }
        false
    }

    fn circuits_share_vertex(&self, a: CircuitId, b: CircuitId) -> bool {
        let verts_a: Vec<usize> = self
            .ring_edges(a)
            .iter()
            .map(|&e| self.mesh.edges[e].vertex1)
            .collect();
        // Compare through atoms, not mesh vertices: the circuits may live
        // in different charts of the same atom.
        let atoms_a: Vec<usize> = verts_a.iter().map(|&v| self.mesh.vertices[v].atom).collect();
        self.ring_edges(b)
            .iter()
            .any(|&e| atoms_a.contains(&self.mesh.vertices[self.mesh.edges[e].vertex1].atom))
    }

    /// Every junction ring's Burgers vectors, brought into a common
    /// cluster frame, must cancel.
    fn verify_junction_sums(&mut self) {
        let mut checked = vec![false; self.network.nodes.len()];
        for node in 0..self.network.nodes.len() {
            if checked[node] || self.network.is_dangling(node) {
                continue;
            }
            let mut members = vec![node];
            let mut current = self.network.nodes[node].junction_ring;
            while current != node {
                members.push(current);
                current = self.network.nodes[current].junction_ring;
            }
            for &m in &members {
                checked[m] = true;
            }

            let reference = self
                .network
                .node_burgers_vector(members[0])
                .cluster
                .expect("segment burgers vectors carry clusters");
            let mut sum = Vector3::zeros();
            let mut complete = true;
            for &m in &members {
                let mut v = self.network.node_burgers_vector(m);
                if !v.transform_to_cluster(reference, self.graph) {
                    complete = false;
                    break;
                }
                sum += v.vec;
            }
            if complete && sum.norm() > LATTICE_VECTOR_EPSILON {
                warn!(
                    "junction of {} arms violates Burgers conservation (|sum| = {:.2e})",
                    members.len(),
                    sum.norm()
                );
            }
        }
    }

    // --- Phase 4: bookkeeping ---

    /// Records dangling state on circuits and snapshots the mesh caps of
    /// the ends that stayed dangling.
    fn finish(&mut self) {
        for circuit in 0..self.circuits.len() {
            let node = self.circuits[circuit].node;
            let dangling = self.network.is_dangling(node);
            self.circuits[circuit].is_dangling = dangling;
            if dangling {
                let cap = self.ring_edges(circuit);
                self.circuits[circuit].segment_mesh_cap = cap;
            }
        }
    }
}

fn matrix_is_identity(m: &Matrix3<f64>, epsilon: f64) -> bool {
    let identity = Matrix3::identity();
    m.iter()
        .zip(identity.iter())
        .all(|(a, b): (&f64, &f64)| (a - b).abs() <= epsilon)
}

/// Result of the tracing stage.
pub struct TracerOutput {
    pub network: DislocationNetwork,
    pub dangling_nodes: Vec<NodeId>,
    /// Cap geometry per dangling node: node position plus the mesh edges
    /// of its final circuit.
    pub caps: Vec<(Point3<f64>, Vec<HalfEdgeId>)>,
}
