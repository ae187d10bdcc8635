//! Tracing on a hand-built interface mesh: a triangulated hexagonal tube
//! whose edge lattice vectors carry a seam defect, so every circuit
//! winding the tube once picks up the same non-zero Burgers vector.

use dxa_core::analysis::tracer::BurgersCircuitTracer;
use dxa_core::core::cluster::ClusterGraph;
use dxa_core::core::structures::StructureType;
use dxa_core::geometry::halfedge::HalfEdgeMesh;
use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const RINGS: usize = 4;
const SIDES: usize = 6;

fn atom_of(ring: usize, k: usize) -> usize {
    ring * SIDES + (k % SIDES)
}

fn position_of(atom: usize) -> Point3<f64> {
    let ring = atom / SIDES;
    let k = atom % SIDES;
    let angle = k as f64 * std::f64::consts::FRAC_PI_3;
    Point3::new(angle.cos(), angle.sin(), ring as f64)
}

/// Lattice coordinate of an atom; the tube axis doubles as a lattice
/// direction so that edge vectors are simply coordinate differences.
fn lattice_of(atom: usize) -> Vector3<f64> {
    position_of(atom).coords
}

/// Ideal vector of a directed edge, with the seam defect injected on
/// edges crossing from k = 5 to k = 0.
fn edge_vector(tail: usize, head: usize, burgers: &Vector3<f64>) -> Vector3<f64> {
    let mut v = lattice_of(head) - lattice_of(tail);
    let tk = tail % SIDES;
    let hk = head % SIDES;
    if tk == SIDES - 1 && hk == 0 {
        v += burgers;
    } else if tk == 0 && hk == SIDES - 1 {
        v -= burgers;
    }
    v
}

fn build_tube(
    burgers: &Vector3<f64>,
) -> (HalfEdgeMesh, ClusterGraph) {
    let mut graph = ClusterGraph::new();
    let cluster = graph.create_cluster(StructureType::Fcc);
    let self_transition = graph.create_self_transition(cluster);

    let mut mesh = HalfEdgeMesh::new();
    for r in 0..RINGS - 1 {
        for k in 0..SIDES {
            let a = atom_of(r, k);
            let b = atom_of(r, k + 1);
            let c = atom_of(r + 1, k + 1);
            let d = atom_of(r + 1, k);
            let va = mesh.chart_vertex(a, 1, position_of(a));
            let vb = mesh.chart_vertex(b, 1, position_of(b));
            let vc = mesh.chart_vertex(c, 1, position_of(c));
            let vd = mesh.chart_vertex(d, 1, position_of(d));
            mesh.create_face([va, vb, vc], 1);
            mesh.create_face([va, vc, vd], 1);
        }
    }

    for e in 0..mesh.edge_count() {
        let tail = mesh.vertices[mesh.edges[e].vertex1].atom;
        let head = mesh.vertices[mesh.edges[e].vertex2].atom;
        mesh.edges[e].physical_vector = position_of(head) - position_of(tail);
        mesh.edges[e].cluster_vector = edge_vector(tail, head, burgers);
        mesh.edges[e].cluster_transition = self_transition;
    }

    (mesh, graph)
}

#[test]
fn tube_mesh_is_well_formed() {
    let (mesh, _) = build_tube(&Vector3::new(0.5, 0.0, 0.5));
    assert_eq!(mesh.vertex_count(), RINGS * SIDES);
    assert_eq!(mesh.face_count(), (RINGS - 1) * SIDES * 2);
    // Open edges: the two boundary rings only.
    assert_eq!(mesh.open_edge_count(), 2 * SIDES);
    for e in 0..mesh.edge_count() {
        if let Some(op) = mesh.edges[e].opposite {
            assert_eq!(mesh.edges[op].opposite, Some(e));
            assert_eq!(mesh.edges[op].vertex1, mesh.edges[e].vertex2);
            assert_eq!(mesh.edges[op].vertex2, mesh.edges[e].vertex1);
        }
    }
}

#[test]
fn face_circuits_close_despite_the_seam() {
    let (mesh, _) = build_tube(&Vector3::new(0.5, 0.0, 0.5));
    for face in &mesh.faces {
        let sum: Vector3<f64> = face
            .edges
            .iter()
            .map(|&e| mesh.edges[e].cluster_vector)
            .sum();
        assert!(sum.norm() < 1e-12, "face does not close: {:?}", sum);
    }
}

#[test]
fn winding_circuits_carry_the_seam_burgers_vector() {
    let burgers = Vector3::new(0.5, 0.0, 0.5);
    let (mut mesh, mut graph) = build_tube(&burgers);

    let tracer = BurgersCircuitTracer::new(&mut mesh, &mut graph, 8, 20);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let out = tracer.trace(&mut rng);

    assert!(
        !out.network.segments.is_empty(),
        "the seam defect must produce at least one segment"
    );
    for segment in &out.network.segments {
        let v = segment.burgers_vector.vec;
        let matches_forward = (v - burgers).norm() < 1e-9;
        let matches_backward = (v + burgers).norm() < 1e-9;
        assert!(
            matches_forward || matches_backward,
            "unexpected Burgers vector {:?}",
            v
        );
        assert!(segment.line.len() >= 2);
        assert_eq!(segment.core_size.len(), segment.line.len());
        assert_eq!(segment.burgers_vector.cluster, Some(1));
    }
}

#[test]
fn defect_free_tube_yields_no_segments() {
    let (mut mesh, mut graph) = build_tube(&Vector3::zeros());
    let tracer = BurgersCircuitTracer::new(&mut mesh, &mut graph, 8, 20);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let out = tracer.trace(&mut rng);
    assert!(out.network.segments.is_empty());
}
