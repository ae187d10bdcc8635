use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use crate::core::cluster::TransitionId;

pub type VertexId = usize;
pub type HalfEdgeId = usize;
pub type FaceId = usize;

/// Index of a Burgers circuit in the tracer's circuit arena.
pub type CircuitId = usize;

/// A mesh vertex. Several mesh vertices may map to the same atom when the
/// surface passes the atom in more than one chart.
#[derive(Debug, Clone)]
pub struct MeshVertex {
    pub atom: usize,
    pub pos: Point3<f64>,
}

/// An oriented half-edge of the interface mesh.
#[derive(Debug, Clone)]
pub struct MeshHalfEdge {
    pub vertex1: VertexId,
    pub vertex2: VertexId,
    pub face: FaceId,
    pub opposite: Option<HalfEdgeId>,
    /// Successor within the face's cyclic edge ring.
    pub next_face_edge: HalfEdgeId,
    /// Actual Euclidean displacement from vertex1 to vertex2.
    pub physical_vector: Vector3<f64>,
    /// Ideal lattice displacement in vertex1's cluster frame.
    pub cluster_vector: Vector3<f64>,
    /// Transition from vertex1's cluster into vertex2's.
    pub cluster_transition: TransitionId,
    /// Owning Burgers circuit, set during tracing.
    pub circuit: Option<CircuitId>,
    /// Successor along the owning circuit's ring.
    pub next_circuit_edge: Option<HalfEdgeId>,
}

#[derive(Debug, Clone)]
pub struct MeshFace {
    pub edges: [HalfEdgeId; 3],
    /// Region (supergrain label) of the good tetrahedron that emitted the
    /// face.
    pub region: u32,
    /// The circuit that swept this face during tracing, if any.
    pub circuit: Option<CircuitId>,
}

/// Index-based half-edge mesh storage. Opposite half-edges are glued
/// lazily as faces are created; the result is an oriented 2-manifold with
/// boundary, one chart per region.
#[derive(Debug, Default)]
pub struct HalfEdgeMesh {
    pub vertices: Vec<MeshVertex>,
    pub edges: Vec<MeshHalfEdge>,
    pub faces: Vec<MeshFace>,
    /// Key for gluing: a directed edge waiting for its antiparallel twin.
    pending_opposites: HashMap<(VertexId, VertexId), HalfEdgeId>,
    /// Chart lookup: (atom, region) to mesh vertex.
    chart_vertices: HashMap<(usize, u32), VertexId>,
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Finds or creates the mesh vertex for `atom` within `region`'s
    /// chart. Atoms shared by several charts get one vertex per chart.
    pub fn chart_vertex(&mut self, atom: usize, region: u32, pos: Point3<f64>) -> VertexId {
        if let Some(&v) = self.chart_vertices.get(&(atom, region)) {
            return v;
        }
        let v = self.vertices.len();
        self.vertices.push(MeshVertex { atom, pos });
        self.chart_vertices.insert((atom, region), v);
        v
    }

    /// Creates a triangular face over three existing vertices. Edge `i`
    /// runs from vertex `i` to vertex `i+1`; edge payloads are filled by
    /// the caller through the returned ids.
    pub fn create_face(&mut self, vertices: [VertexId; 3], region: u32) -> FaceId {
        let face = self.faces.len();
        let base = self.edges.len();
        for i in 0..3 {
            let v1 = vertices[i];
            let v2 = vertices[(i + 1) % 3];
            self.edges.push(MeshHalfEdge {
                vertex1: v1,
                vertex2: v2,
                face,
                opposite: None,
                next_face_edge: base + (i + 1) % 3,
                physical_vector: Vector3::zeros(),
                cluster_vector: Vector3::zeros(),
                cluster_transition: 0,
                circuit: None,
                next_circuit_edge: None,
            });
        }
        self.faces.push(MeshFace {
            edges: [base, base + 1, base + 2],
            region,
            circuit: None,
        });

        // Glue matching antiparallel half-edges as they appear.
        for i in 0..3 {
            let e = base + i;
            let key = (self.edges[e].vertex1, self.edges[e].vertex2);
            let twin_key = (key.1, key.0);
            match self.pending_opposites.get(&twin_key).copied() {
                Some(twin) if self.edges[twin].opposite.is_none() => {
                    self.edges[e].opposite = Some(twin);
                    self.edges[twin].opposite = Some(e);
                    self.pending_opposites.remove(&twin_key);
                }
                _ => {
                    self.pending_opposites.insert(key, e);
                }
            }
        }
        face
    }

    pub fn next_face_edge(&self, e: HalfEdgeId) -> HalfEdgeId {
        self.edges[e].next_face_edge
    }

    pub fn prev_face_edge(&self, e: HalfEdgeId) -> HalfEdgeId {
        // Triangles: previous is next-of-next.
        self.edges[self.edges[e].next_face_edge].next_face_edge
    }

    /// Number of half-edges left unglued (mesh boundary edges).
    pub fn open_edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.opposite.is_none()).count()
    }
}
