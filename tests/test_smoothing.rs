use dxa_core::analysis::smoothing::{smooth_dislocation_lines, SmoothingParams};
use dxa_core::core::cluster::ClusterVector;
use dxa_core::core::dislocations::DislocationNetwork;
use nalgebra::{Point3, Vector3};

fn network_with_line(points: Vec<Point3<f64>>) -> DislocationNetwork {
    let mut network = DislocationNetwork::new();
    let s = network.create_segment(ClusterVector::new(Vector3::new(0.5, 0.5, 0.0), 1));
    let n = points.len();
    network.segments[s].line = points.into_iter().collect();
    network.segments[s].core_size = (0..n).map(|_| 4).collect();
    network
}

#[test]
fn straight_lines_are_fixed_points_of_smoothing() {
    let points: Vec<Point3<f64>> = (0..12).map(|i| Point3::new(i as f64, 2.0, -1.0)).collect();
    let mut network = network_with_line(points.clone());
    smooth_dislocation_lines(
        &mut network,
        SmoothingParams {
            smoothing_level: 6,
            coarsening_interval: 0.0,
        },
    );
    let line = &network.segments[0].line;
    assert_eq!(line.len(), points.len());
    for (p, q) in line.iter().zip(&points) {
        assert!((p - q).norm() < 1e-10);
    }
}

#[test]
fn core_sizes_are_cleared_after_smoothing() {
    let points: Vec<Point3<f64>> = (0..8)
        .map(|i| Point3::new(i as f64, (i as f64 * 0.7).sin(), 0.0))
        .collect();
    let mut network = network_with_line(points);
    smooth_dislocation_lines(
        &mut network,
        SmoothingParams {
            smoothing_level: 4,
            coarsening_interval: 4.0,
        },
    );
    assert!(network.segments[0].core_size.is_empty());
    assert!(network.segments[0].line.len() >= 2);
}

#[test]
fn disabled_smoothing_still_clears_core_sizes() {
    let points: Vec<Point3<f64>> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
    let mut network = network_with_line(points.clone());
    smooth_dislocation_lines(
        &mut network,
        SmoothingParams {
            smoothing_level: 0,
            coarsening_interval: 0.0,
        },
    );
    assert!(network.segments[0].core_size.is_empty());
    assert_eq!(network.segments[0].line.len(), points.len());
}

#[test]
fn smoothing_preserves_endpoints_of_open_lines() {
    let points: Vec<Point3<f64>> = (0..10)
        .map(|i| Point3::new(i as f64, (i % 2) as f64, 0.0))
        .collect();
    let mut network = network_with_line(points.clone());
    smooth_dislocation_lines(
        &mut network,
        SmoothingParams {
            smoothing_level: 5,
            coarsening_interval: 0.0,
        },
    );
    let line = &network.segments[0].line;
    assert!((line.front().unwrap() - points[0]).norm() < 1e-12);
    assert!((line.back().unwrap() - points[9]).norm() < 1e-12);
}
