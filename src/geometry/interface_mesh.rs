use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use nalgebra::Point3;
use rayon::prelude::*;

use crate::analysis::elastic::ElasticMapping;
use crate::analysis::structure::StructureAnalysis;
use crate::core::cluster::{ClusterGraph, ClusterId};
use crate::engine::error::AnalysisError;
use crate::geometry::delaunay::DelaunayTessellation;
use crate::geometry::halfedge::{FaceId, HalfEdgeId, HalfEdgeMesh};

/// Face corner orderings with outward normals (away from the emitting
/// tetrahedron); entry `k` is the face opposite corner `k`.
const OUTWARD_FACE_VERTICES: [[usize; 3]; 4] = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];

/// Margin on the half-cell displacement check.
const WRAP_CHECK_EPSILON: f64 = 1e-9;

/// The triangular boundary between good crystal and defect regions,
/// stored as a half-edge mesh with one chart per supergrain region.
pub struct InterfaceMesh {
    pub mesh: HalfEdgeMesh,
    /// Region label per tessellation cell: 0 is bad (incompatible,
    /// amorphous, or alpha-filtered), otherwise the supergrain root
    /// cluster id plus one.
    pub cell_regions: Vec<u32>,
    pub is_completely_good: bool,
    pub is_completely_bad: bool,
}

impl InterfaceMesh {
    /// Classifies every tetrahedron and collects the faces separating
    /// differently labeled regions into a half-edge mesh.
    pub fn create(
        sa: &StructureAnalysis,
        tessellation: &DelaunayTessellation,
        elastic: &ElasticMapping,
        graph: &ClusterGraph,
        max_neighbor_distance: f64,
    ) -> Result<Self, AnalysisError> {
        // Supergrain roots: follow parent transitions to the class
        // representative so subgrain boundaries do not tear the mesh.
        let roots = supergrain_roots(graph);

        let alpha = 5.0 * max_neighbor_distance;
        let alpha_sq = alpha * alpha;

        let is_completely_good = AtomicBool::new(true);
        let is_completely_bad = AtomicBool::new(true);

        let cell_regions: Vec<u32> = (0..tessellation.cell_count())
            .into_par_iter()
            .map(|cell| {
                if !tessellation.alpha_test(cell, alpha_sq)
                    || !elastic.is_elastically_compatible(tessellation, cell, graph)
                {
                    if !tessellation.is_ghost_cell(cell) {
                        is_completely_good.store(false, Ordering::Relaxed);
                    }
                    return 0;
                }
                if !tessellation.is_ghost_cell(cell) {
                    is_completely_bad.store(false, Ordering::Relaxed);
                }
                // Region: most common vertex cluster of the four corners.
                let mut clusters = [0 as ClusterId; 4];
                for (slot, cluster) in clusters.iter_mut().enumerate() {
                    let particle =
                        tessellation.vertex_particle(tessellation.cell_vertex(cell, slot));
                    *cluster = roots[elastic.cluster_of_vertex(particle)];
                }
                clusters.sort_unstable();
                most_common(&clusters) as u32 + 1
            })
            .collect();

        let mut mesh = HalfEdgeMesh::new();
        let mut dropped_faces = 0usize;

        for cell in tessellation.cells() {
            if tessellation.is_ghost_cell(cell) {
                continue;
            }
            let region = cell_regions[cell];
            if region == 0 {
                continue;
            }
            for k in 0..4 {
                let neighbor_region = tessellation
                    .cell_neighbor(cell, k)
                    .map_or(0, |n| cell_regions[n]);
                if neighbor_region == region {
                    continue;
                }

                let corners = OUTWARD_FACE_VERTICES[k];
                let verts = [
                    tessellation.cell_vertex(cell, corners[0]),
                    tessellation.cell_vertex(cell, corners[1]),
                    tessellation.cell_vertex(cell, corners[2]),
                ];
                let particles = [
                    tessellation.vertex_particle(verts[0]),
                    tessellation.vertex_particle(verts[1]),
                    tessellation.vertex_particle(verts[2]),
                ];

                // The elastic data must exist for every edge of a good
                // tetrahedron; a miss means the tessellation was not
                // periodic near this face, so skip it instead of lying.
                let mut payload = [None; 3];
                for i in 0..3 {
                    payload[i] =
                        elastic.edge_cluster_vector(particles[i], particles[(i + 1) % 3], graph);
                }
                if payload.iter().any(Option::is_none) {
                    dropped_faces += 1;
                    continue;
                }

                let mesh_verts = [
                    mesh.chart_vertex(
                        particles[0],
                        region,
                        sa.cell.wrap_point(&sa.positions[particles[0]]),
                    ),
                    mesh.chart_vertex(
                        particles[1],
                        region,
                        sa.cell.wrap_point(&sa.positions[particles[1]]),
                    ),
                    mesh.chart_vertex(
                        particles[2],
                        region,
                        sa.cell.wrap_point(&sa.positions[particles[2]]),
                    ),
                ];
                let face = mesh.create_face(mesh_verts, region);

                for i in 0..3 {
                    let edge_id = mesh.faces[face].edges[i];
                    let p1 = tessellation.vertex_position(verts[i]);
                    let p2 = tessellation.vertex_position(verts[(i + 1) % 3]);
                    let physical = p2 - p1;
                    for dim in 0..3 {
                        if sa.cell.has_pbc(dim)
                            && sa.cell.reduced_coord(&physical, dim).abs()
                                >= 0.5 + WRAP_CHECK_EPSILON
                        {
                            return Err(AnalysisError::CellTooSmall { axis: dim });
                        }
                    }
                    let (cluster_vector, transition) = payload[i].unwrap();
                    let edge = &mut mesh.edges[edge_id];
                    edge.physical_vector = physical;
                    edge.cluster_vector = cluster_vector;
                    edge.cluster_transition = transition;
                }
            }
        }

        if dropped_faces > 0 {
            warn!(
                "interface mesh: {} faces dropped for missing elastic data",
                dropped_faces
            );
        }
        debug!(
            "interface mesh: {} vertices, {} faces, {} open half-edges",
            mesh.vertex_count(),
            mesh.face_count(),
            mesh.open_edge_count()
        );

        Ok(Self {
            mesh,
            cell_regions,
            is_completely_good: is_completely_good.load(Ordering::Relaxed),
            is_completely_bad: is_completely_bad.load(Ordering::Relaxed),
        })
    }
}

/// A closed triangle-soup copy of the interface mesh with circuit-swept
/// faces removed and each dangling segment end capped.
#[derive(Debug, Default)]
pub struct DefectMesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[u32; 3]>,
}

/// Builds the defect mesh from the traced interface mesh: faces for which
/// `keep_face` is false are dropped, and for every dangling node a fan of
/// cap triangles joins the node position to its stored cap edges
/// (reversed, so the cap faces outward).
pub fn build_defect_mesh(
    mesh: &HalfEdgeMesh,
    keep_face: impl Fn(FaceId) -> bool,
    caps: &[(Point3<f64>, Vec<HalfEdgeId>)],
) -> DefectMesh {
    let mut out = DefectMesh::default();
    out.vertices = mesh.vertices.iter().map(|v| v.pos).collect();

    for (face_id, face) in mesh.faces.iter().enumerate() {
        if !keep_face(face_id) {
            continue;
        }
        out.triangles.push([
            mesh.edges[face.edges[0]].vertex1 as u32,
            mesh.edges[face.edges[1]].vertex1 as u32,
            mesh.edges[face.edges[2]].vertex1 as u32,
        ]);
    }

    for (position, cap_edges) in caps {
        let apex = out.vertices.len() as u32;
        out.vertices.push(*position);
        for &e in cap_edges {
            let v1 = mesh.edges[e].vertex2 as u32;
            let v2 = mesh.edges[e].vertex1 as u32;
            out.triangles.push([v1, v2, apex]);
        }
    }

    out
}

/// Root cluster of every supergrain, found by chasing parent transitions.
fn supergrain_roots(graph: &ClusterGraph) -> Vec<ClusterId> {
    let clusters = graph.clusters();
    let mut roots: Vec<ClusterId> = (0..clusters.len()).collect();
    for (id, root) in roots.iter_mut().enumerate() {
        let mut current = id;
        // Parent chains are short; still bound the walk defensively.
        for _ in 0..clusters.len() {
            match clusters[current].parent_transition {
                Some(t) => {
                    let parent = graph.transition(t).cluster2;
                    if parent == current {
                        break;
                    }
                    current = parent;
                }
                None => break,
            }
        }
        *root = current;
    }
    roots
}

/// Most frequent value of a sorted slice; earlier (smaller) values win
/// ties.
fn most_common(sorted: &[ClusterId]) -> ClusterId {
    debug_assert!(!sorted.is_empty());
    let mut best = sorted[0];
    let mut best_count = 1;
    let mut current_count = 1;
    for i in 1..sorted.len() {
        if sorted[i] == sorted[i - 1] {
            current_count += 1;
        } else {
            if current_count > best_count {
                best_count = current_count;
                best = sorted[i - 1];
            }
            current_count = 1;
        }
    }
    if current_count > best_count {
        best = sorted[sorted.len() - 1];
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_common_picks_majority() {
        assert_eq!(most_common(&[1, 2, 2, 3]), 2);
        assert_eq!(most_common(&[4, 4, 4, 4]), 4);
        assert_eq!(most_common(&[1, 1, 2, 2]), 1); // tie: smaller id
        assert_eq!(most_common(&[7]), 7);
    }
}
