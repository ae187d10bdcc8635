mod common;

use common::{fcc_bicrystal, fcc_lattice};
use dxa_core::core::cell::SimulationCell;
use dxa_core::core::structures::{disorientation, StructureType, SymmetryGroup};
use dxa_core::{analyze, Options};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn options_survive_a_serde_round_trip() {
    let options = Options {
        max_burgers_circuit_size: 9,
        deterministic: true,
        ..Options::default()
    };
    let json = serde_json::to_string(&options).unwrap();
    let back: Options = serde_json::from_str(&json).unwrap();
    assert_eq!(back.max_burgers_circuit_size, 9);
    assert!(back.deterministic);
    assert_eq!(back.rmsd_threshold, options.rmsd_threshold);
}

#[test]
fn empty_input_is_trivially_good_and_bad() {
    let cell = SimulationCell::orthorhombic(1.0, 1.0, 1.0, [true, true, true]).unwrap();
    let output = analyze(&[], &cell, &Options::default()).unwrap();

    assert!(output.network.segments.is_empty());
    assert_eq!(output.interface_mesh.mesh.face_count(), 0);
    assert!(output.interface_mesh.is_completely_good);
    assert!(output.interface_mesh.is_completely_bad);
    assert!(output.structure_types.is_empty());
}

#[test]
fn perfect_fcc_crystal_is_completely_good() {
    let a = 4.05;
    let (positions, cell) = fcc_lattice(a, 10, 10, 10);
    assert_eq!(positions.len(), 4000);

    let options = Options {
        input_crystal_type: Some(StructureType::Fcc),
        deterministic: true,
        ..Options::default()
    };
    let output = analyze(&positions, &cell, &options).unwrap();

    // Every atom fcc, all in one cluster with identity orientation.
    for (i, &t) in output.structure_types.iter().enumerate() {
        assert_eq!(t, StructureType::Fcc, "atom {}", i);
        assert_eq!(output.atom_clusters[i], 1);
    }
    let cluster = &output.cluster_graph.clusters()[1];
    assert_eq!(cluster.atom_count, 4000);
    let d = disorientation(
        SymmetryGroup::Cubic,
        &output.orientations[0],
        &nalgebra::Quaternion::new(1.0, 0.0, 0.0, 0.0),
    );
    assert!(d < 1e-3);

    // No defects: empty mesh, empty network.
    assert!(output.network.segments.is_empty());
    assert_eq!(output.interface_mesh.mesh.face_count(), 0);
    assert!(output.interface_mesh.is_completely_good);
    assert!(!output.interface_mesh.is_completely_bad);
}

#[test]
fn cell_shorter_than_twice_the_cutoff_errors_before_tracing() {
    let a = 4.05;
    // A single cell layer along z: 4.05 < 2 * first-shell distance.
    let (positions, cell) = fcc_lattice(a, 6, 6, 1);
    let options = Options {
        deterministic: true,
        ..Options::default()
    };
    match analyze(&positions, &cell, &options) {
        Err(dxa_core::AnalysisError::CellTooSmall { axis }) => assert_eq!(axis, 2),
        other => panic!("expected CellTooSmall, got {:?}", other.as_ref().err()),
    }
}

#[test]
fn amorphous_inclusion_builds_an_interface_mesh_without_dislocations() {
    let a = 4.05;
    let (mut positions, cell) = fcc_lattice(a, 6, 6, 6);
    let center = Point3::new(3.0 * a, 3.0 * a, 3.0 * a);
    let radius = 1.2 * a;

    // Scramble a ball of atoms into an amorphous inclusion.
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for p in positions.iter_mut() {
        if (*p - center).norm() < radius {
            let dir = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            *p += 0.35 * a * dir;
        }
    }

    let options = Options {
        deterministic: true,
        ..Options::default()
    };
    let output = analyze(&positions, &cell, &options).unwrap();

    assert!(!output.interface_mesh.is_completely_good);
    assert!(!output.interface_mesh.is_completely_bad);
    assert!(
        output.interface_mesh.mesh.face_count() > 0,
        "the inclusion boundary must appear in the mesh"
    );
    // A point defect cloud carries no net Burgers content.
    for segment in &output.network.segments {
        assert!(segment.line.len() >= 2);
        assert!(segment.core_size.is_empty(), "smoothing clears core sizes");
    }
}

#[test]
fn deterministic_mode_reproduces_the_network_exactly() {
    let a = 4.05;
    let (mut positions, cell) = fcc_lattice(a, 5, 5, 5);
    let center = Point3::new(2.5 * a, 2.5 * a, 2.5 * a);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for p in positions.iter_mut() {
        if (*p - center).norm() < a {
            *p += 0.3
                * a
                * Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
        }
    }

    let options = Options {
        deterministic: true,
        ..Options::default()
    };
    let first = analyze(&positions, &cell, &options).unwrap();
    let second = analyze(&positions, &cell, &options).unwrap();

    assert_eq!(first.structure_types, second.structure_types);
    assert_eq!(first.atom_clusters, second.atom_clusters);
    assert_eq!(
        first.interface_mesh.mesh.face_count(),
        second.interface_mesh.mesh.face_count()
    );
    assert_eq!(first.network.segments.len(), second.network.segments.len());
    for (s1, s2) in first.network.segments.iter().zip(&second.network.segments) {
        assert_eq!(s1.id, s2.id);
        assert_eq!(s1.line.len(), s2.line.len());
        for (p, q) in s1.line.iter().zip(&s2.line) {
            assert_eq!(p, q, "deterministic runs must agree bitwise");
        }
        assert_eq!(s1.burgers_vector.cluster, s2.burgers_vector.cluster);
        assert_eq!(s1.burgers_vector.vec, s2.burgers_vector.vec);
    }
}

#[test]
fn low_angle_bicrystal_yields_two_clusters_and_a_five_degree_transition() {
    let a = 4.05;
    let (positions, cell) = fcc_bicrystal(a, 6, 5.0);
    let options = Options {
        input_crystal_type: Some(StructureType::Fcc),
        deterministic: true,
        ..Options::default()
    };
    let output = analyze(&positions, &cell, &options).unwrap();

    // The two dominant grains.
    let mut by_size: Vec<_> = output
        .cluster_graph
        .clusters()
        .iter()
        .filter(|c| c.id != 0)
        .collect();
    by_size.sort_by_key(|c| std::cmp::Reverse(c.atom_count));
    assert!(by_size.len() >= 2, "expected at least two grains");
    let (g1, g2) = (by_size[0].id, by_size[1].id);

    let t = output
        .cluster_graph
        .find_transition(g1, g2)
        .expect("the grain boundary must record a transition");
    let tm = output.cluster_graph.transition(t).tm;
    let q = UnitQuaternion::from_matrix(&tm).into_inner();
    let angle = disorientation(
        SymmetryGroup::Cubic,
        &q,
        &nalgebra::Quaternion::new(1.0, 0.0, 0.0, 0.0),
    );
    assert!((angle - 5.0).abs() < 0.1, "tilt angle {}", angle);

    // 5 degrees is inside the supergrain tolerance: one of the two grains
    // records a parent transition into the other.
    let parents = [g1, g2]
        .iter()
        .filter(|&&g| output.cluster_graph.clusters()[g].parent_transition.is_some())
        .count();
    assert_eq!(parents, 1);

    // Free surfaces alone guarantee a non-empty interface mesh.
    assert!(output.interface_mesh.mesh.face_count() > 0);
    assert!(!output.interface_mesh.is_completely_good);
}
