use dxa_core::core::cell::SimulationCell;
use nalgebra::{Matrix3, Point3, Vector3};

#[test]
fn wrap_point_idempotence() {
    let cell = SimulationCell::orthorhombic(4.05, 4.05, 4.05, [true, true, true]).unwrap();
    for p in [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(10.3, -7.7, 4.0499),
        Point3::new(-0.001, 4.051, 100.0),
    ] {
        let once = cell.wrap_point(&p);
        let twice = cell.wrap_point(&once);
        assert!((once - twice).norm() < 1e-12);
    }
}

#[test]
fn reduced_absolute_round_trip() {
    let matrix = Matrix3::new(4.0, 0.2, 0.0, 0.0, 5.0, 0.1, 0.3, 0.0, 6.0);
    let cell = SimulationCell::new(matrix, [true, false, true]).unwrap();
    for r in [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.25, 0.75, -0.5),
        Vector3::new(1.5, -2.0, 0.333),
    ] {
        let back = cell.absolute_to_reduced(&cell.reduced_to_absolute(&r));
        assert!((back - r).norm() < 1e-12);
    }
}

#[test]
fn wrap_vector_respects_non_periodic_axes() {
    let cell = SimulationCell::orthorhombic(10.0, 10.0, 10.0, [true, false, false]).unwrap();
    let v = Vector3::new(9.0, 9.0, 9.0);
    let w = cell.wrap_vector(&v);
    assert!((w.x - -1.0).abs() < 1e-12);
    assert!((w.y - 9.0).abs() < 1e-12);
    assert!((w.z - 9.0).abs() < 1e-12);
}

#[test]
fn cell_normal_vectors_are_unit_and_outward() {
    let cell = SimulationCell::orthorhombic(3.0, 4.0, 5.0, [true, true, true]).unwrap();
    for dim in 0..3 {
        let n = cell.cell_normal_vector(dim);
        assert!((n.norm() - 1.0).abs() < 1e-12);
        assert!(n.dot(&cell.matrix().column(dim)) > 0.0);
    }
}

#[test]
fn is_wrapped_vector_threshold() {
    let cell = SimulationCell::orthorhombic(10.0, 10.0, 10.0, [true, true, true]).unwrap();
    assert!(!cell.is_wrapped_vector(&Vector3::new(4.9, 0.0, 0.0)));
    assert!(cell.is_wrapped_vector(&Vector3::new(5.0, 0.0, 0.0)));
    assert!(cell.is_wrapped_vector(&Vector3::new(0.0, -5.1, 0.0)));
}
