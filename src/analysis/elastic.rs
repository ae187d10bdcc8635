use log::debug;
use nalgebra::{Matrix3, Vector3};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::analysis::path::CrystalPathFinder;
use crate::analysis::structure::StructureAnalysis;
use crate::core::cluster::{ClusterGraph, ClusterId, TransitionId};
use crate::core::{LATTICE_VECTOR_EPSILON, TRANSITION_MATRIX_EPSILON};
use crate::geometry::delaunay::{CellHandle, DelaunayTessellation, TETRA_EDGE_VERTICES};

/// Stable index of a tessellation edge.
pub type EdgeId = usize;

/// An edge of the Delaunay tessellation between two particles, enriched
/// with the ideal crystal displacement (in `vertex1`'s cluster frame) and
/// the cluster transition from `vertex1`'s to `vertex2`'s cluster.
#[derive(Debug, Clone)]
pub struct TessellationEdge {
    pub vertex1: usize,
    pub vertex2: usize,
    pub cluster_vector: Vector3<f64>,
    pub cluster_transition: Option<TransitionId>,
    next_leaving: Option<EdgeId>,
    next_arriving: Option<EdgeId>,
}

impl TessellationEdge {
    pub fn has_cluster_vector(&self) -> bool {
        self.cluster_transition.is_some()
    }
}

/// Assigns ideal lattice vectors and cluster transitions to the edges of
/// the tessellation, then classifies tetrahedra as elastically compatible
/// (good crystal) or not.
pub struct ElasticMapping<'a> {
    sa: &'a StructureAnalysis,
    edges: Vec<TessellationEdge>,
    /// Per-particle heads of the leaving/arriving edge lists.
    vertex_edges: Vec<(Option<EdgeId>, Option<EdgeId>)>,
    /// Cluster attribution per particle; amorphous particles inherit the
    /// cluster of an edge-connected crystalline particle.
    vertex_clusters: Vec<ClusterId>,
}

impl<'a> ElasticMapping<'a> {
    /// Registers one tessellation edge per non-wrapping vertex pair of
    /// every primary tetrahedron.
    pub fn generate_edges(sa: &'a StructureAnalysis, tessellation: &DelaunayTessellation) -> Self {
        let atom_count = sa.atom_count();
        let mut mapping = Self {
            sa,
            edges: Vec::new(),
            vertex_edges: vec![(None, None); atom_count],
            vertex_clusters: vec![0; atom_count],
        };

        for cell in tessellation.cells() {
            if tessellation.is_ghost_cell(cell) {
                continue;
            }
            for &(ci, cj) in &TETRA_EDGE_VERTICES {
                let va = tessellation.cell_vertex(cell, ci);
                let vb = tessellation.cell_vertex(cell, cj);
                let v1 = tessellation.vertex_particle(va);
                let v2 = tessellation.vertex_particle(vb);
                if v1 == v2 {
                    continue;
                }
                let delta = tessellation.vertex_position(va) - tessellation.vertex_position(vb);
                if sa.cell.is_wrapped_vector(&delta) {
                    continue;
                }
                if mapping.find_edge(v1, v2).is_none() {
                    let id = mapping.edges.len();
                    mapping.edges.push(TessellationEdge {
                        vertex1: v1,
                        vertex2: v2,
                        cluster_vector: Vector3::zeros(),
                        cluster_transition: None,
                        next_leaving: mapping.vertex_edges[v1].0,
                        next_arriving: mapping.vertex_edges[v2].1,
                    });
                    mapping.vertex_edges[v1].0 = Some(id);
                    mapping.vertex_edges[v2].1 = Some(id);
                }
            }
        }

        debug!("elastic mapping: {} tessellation edges", mapping.edges.len());
        mapping
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, id: EdgeId) -> &TessellationEdge {
        &self.edges[id]
    }

    /// O(degree) lookup of the edge joining two particles, either
    /// direction.
    pub fn find_edge(&self, v1: usize, v2: usize) -> Option<EdgeId> {
        let mut cursor = self.vertex_edges[v1].0;
        while let Some(e) = cursor {
            if self.edges[e].vertex2 == v2 {
                return Some(e);
            }
            cursor = self.edges[e].next_leaving;
        }
        let mut cursor = self.vertex_edges[v1].1;
        while let Some(e) = cursor {
            if self.edges[e].vertex1 == v2 {
                return Some(e);
            }
            cursor = self.edges[e].next_arriving;
        }
        None
    }

    pub fn cluster_of_vertex(&self, particle: usize) -> ClusterId {
        self.vertex_clusters[particle]
    }

    /// Seeds vertex clusters from the atom-cluster map, then repeatedly
    /// lets amorphous vertices inherit the cluster of an edge-connected
    /// crystalline vertex until the attribution is stable.
    pub fn assign_vertices_to_clusters(&mut self) {
        self.vertex_clusters.copy_from_slice(&self.sa.atom_clusters);

        loop {
            let mut changed = false;
            for v in 0..self.vertex_clusters.len() {
                if self.vertex_clusters[v] != 0 {
                    continue;
                }
                let mut cursor = self.vertex_edges[v].0;
                while let Some(e) = cursor {
                    let other = self.edges[e].vertex2;
                    if self.vertex_clusters[other] != 0 {
                        self.vertex_clusters[v] = self.vertex_clusters[other];
                        changed = true;
                        break;
                    }
                    cursor = self.edges[e].next_leaving;
                }
                if self.vertex_clusters[v] != 0 {
                    continue;
                }
                let mut cursor = self.vertex_edges[v].1;
                while let Some(e) = cursor {
                    let other = self.edges[e].vertex1;
                    if self.vertex_clusters[other] != 0 {
                        self.vertex_clusters[v] = self.vertex_clusters[other];
                        changed = true;
                        break;
                    }
                    cursor = self.edges[e].next_arriving;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Attempts to give every edge between crystalline clusters an ideal
    /// vector (in `vertex1`'s cluster frame) plus the transition into
    /// `vertex2`'s cluster. Edges without an admissible crystal path stay
    /// unassigned.
    ///
    /// Edges are processed in parallel; all graph lookups and mutations go
    /// through the coarse lock. Contention stays low because most edges
    /// take the direct-neighbor path.
    pub fn assign_ideal_vectors(&mut self, crystal_path_steps: usize, graph: &Mutex<ClusterGraph>) {
        let assignments: Vec<Option<(usize, Vector3<f64>, TransitionId)>> = (0..self.edges.len())
            .into_par_iter()
            .map_init(
                || CrystalPathFinder::new(self.sa, crystal_path_steps.max(1)),
                |finder, e| {
                    let edge = &self.edges[e];
                    if edge.has_cluster_vector() {
                        return None;
                    }
                    let (v1, v2) = (edge.vertex1, edge.vertex2);
                    let c1 = self.vertex_clusters[v1];
                    let c2 = self.vertex_clusters[v2];
                    if c1 == 0 || c2 == 0 {
                        return None;
                    }

                    let mut graph = graph.lock();
                    let ideal = finder.find_path(v1, v2, &mut graph)?;
                    let source = ideal.cluster.expect("path vectors carry a cluster");

                    // Re-express the path vector in v1's cluster frame.
                    let vec_in_c1 = if source == c1 {
                        ideal.vec
                    } else {
                        let t = graph.determine_transition(source, c1)?;
                        graph.transform(t, &ideal.vec)
                    };

                    let t12 = graph.determine_transition(c1, c2)?;
                    Some((e, vec_in_c1, t12))
                },
            )
            .collect();

        let mut assigned = 0usize;
        for (e, vec, t12) in assignments.into_iter().flatten() {
            self.edges[e].cluster_vector = vec;
            self.edges[e].cluster_transition = Some(t12);
            assigned += 1;
        }

        debug!(
            "elastic mapping: {} / {} edges assigned",
            assigned,
            self.edges.len()
        );
    }

    /// The ideal vector of the (v1, v2) edge oriented from `v1`, together
    /// with the transition into `v2`'s cluster, flipping a stored edge on
    /// the fly when it runs the other way.
    pub fn edge_cluster_vector(
        &self,
        v1: usize,
        v2: usize,
        graph: &ClusterGraph,
    ) -> Option<(Vector3<f64>, TransitionId)> {
        let e = self.find_edge(v1, v2)?;
        let edge = &self.edges[e];
        let transition = edge.cluster_transition?;
        if edge.vertex1 == v1 {
            Some((edge.cluster_vector, transition))
        } else {
            let flipped = graph.transform(transition, &(-edge.cluster_vector));
            Some((flipped, graph.transition(transition).reverse))
        }
    }

    /// A tetrahedron is elastically compatible iff all six edges carry
    /// ideal vectors and, around each of its four faces, both the
    /// translation circuit and the rotation circuit close.
    pub fn is_elastically_compatible(
        &self,
        tessellation: &DelaunayTessellation,
        cell: CellHandle,
        graph: &ClusterGraph,
    ) -> bool {
        let mut edge_vectors: [(Vector3<f64>, TransitionId); 6] =
            [(Vector3::zeros(), 0); 6];
        for (i, &(ci, cj)) in TETRA_EDGE_VERTICES.iter().enumerate() {
            let v1 = tessellation.vertex_particle(tessellation.cell_vertex(cell, ci));
            let v2 = tessellation.vertex_particle(tessellation.cell_vertex(cell, cj));
            if v1 == v2 {
                return false;
            }
            match self.edge_cluster_vector(v1, v2, graph) {
                Some(pair) => edge_vectors[i] = pair,
                None => return false,
            }
        }

        // Each face as a circuit over three edge slots: edge a then b must
        // land where edge c points (a + t_a(b) == c).
        const FACE_CIRCUITS: [[usize; 3]; 4] = [[0, 4, 2], [1, 5, 2], [0, 3, 1], [3, 5, 4]];

        for circuit in &FACE_CIRCUITS {
            let (va, ta) = edge_vectors[circuit[0]];
            let (vb, _) = edge_vectors[circuit[1]];
            let (vc, _) = edge_vectors[circuit[2]];
            // vb lives in the frame past edge a; pull it back through a's
            // reverse transition before closing the triangle.
            let closure = va + graph.reverse_transform(ta, &vb) - vc;
            if closure.norm() >= LATTICE_VECTOR_EPSILON {
                return false;
            }
        }

        for circuit in &FACE_CIRCUITS {
            let ta = edge_vectors[circuit[0]].1;
            let tb = edge_vectors[circuit[1]].1;
            let tc = edge_vectors[circuit[2]].1;
            if graph.is_self_transition(ta)
                && graph.is_self_transition(tb)
                && graph.is_self_transition(tc)
            {
                continue;
            }
            let rc_rev = &graph.transition(graph.transition(tc).reverse).tm;
            let rotation = rc_rev * graph.transition(tb).tm * graph.transition(ta).tm;
            if !rotation_is_identity(&rotation, TRANSITION_MATRIX_EPSILON) {
                return false;
            }
        }

        true
    }
}

fn rotation_is_identity(m: &Matrix3<f64>, epsilon: f64) -> bool {
    let identity = Matrix3::identity();
    m.iter()
        .zip(identity.iter())
        .all(|(a, b): (&f64, &f64)| (a - b).abs() <= epsilon)
}
