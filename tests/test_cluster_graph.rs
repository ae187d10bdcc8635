use dxa_core::core::cluster::{ClusterGraph, ClusterVector};
use dxa_core::core::structures::StructureType;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

fn z_rotation(deg: f64) -> Matrix3<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), deg.to_radians())
        .to_rotation_matrix()
        .into_inner()
}

#[test]
fn reverse_of_reverse_is_identity_and_product_is_identity() {
    let mut graph = ClusterGraph::new();
    let a = graph.create_cluster(StructureType::Fcc);
    let b = graph.create_cluster(StructureType::Fcc);
    let t = graph.create_transition(a, b, &z_rotation(12.0), 1);
    let r = graph.transition(t).reverse;

    assert_eq!(graph.transition(r).reverse, t);
    let product = graph.transition(t).tm * graph.transition(r).tm;
    let identity = Matrix3::identity();
    for (x, y) in product.iter().zip(identity.iter()) {
        let (x, y): (&f64, &f64) = (x, y);
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn non_self_transitions_have_positive_distance() {
    let mut graph = ClusterGraph::new();
    let a = graph.create_cluster(StructureType::Bcc);
    let b = graph.create_cluster(StructureType::Bcc);
    let c = graph.create_cluster(StructureType::Bcc);
    graph.create_transition(a, b, &z_rotation(4.0), 1);
    graph.create_transition(b, c, &z_rotation(5.0), 1);
    graph.determine_transition(a, c).unwrap();
    graph.create_self_transition(b);

    for (id, t) in graph.transitions().iter().enumerate() {
        if graph.is_self_transition(id) {
            assert_eq!(t.distance, 0);
        } else {
            assert!(t.distance >= 1);
        }
    }
}

#[test]
fn transition_composition_law() {
    let mut graph = ClusterGraph::new();
    let a = graph.create_cluster(StructureType::Fcc);
    let b = graph.create_cluster(StructureType::Fcc);
    let c = graph.create_cluster(StructureType::Fcc);
    let t_ab = graph.create_transition(a, b, &z_rotation(9.0), 1);
    let t_bc = graph.create_transition(b, c, &z_rotation(-3.5), 1);

    let composed = graph.concatenate_transitions(t_ab, t_bc);
    let expected = graph.transition(t_bc).tm * graph.transition(t_ab).tm;
    for (x, y) in graph.transition(composed).tm.iter().zip(expected.iter()) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn cluster_vector_moves_between_frames() {
    let mut graph = ClusterGraph::new();
    let a = graph.create_cluster(StructureType::Fcc);
    let b = graph.create_cluster(StructureType::Fcc);
    let tm = z_rotation(90.0);
    graph.create_transition(a, b, &tm, 1);

    let mut v = ClusterVector::new(Vector3::new(1.0, 0.0, 0.0), a);
    assert!(v.transform_to_cluster(b, &mut graph));
    assert_eq!(v.cluster, Some(b));
    assert!((v.vec - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-9);
}

#[test]
fn zero_cluster_vector_has_no_frame() {
    let zero = ClusterVector::zero();
    assert!(zero.cluster.is_none());
    assert_eq!(zero.vec, Vector3::zeros());
}
