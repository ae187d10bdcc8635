#![allow(dead_code)] // each test binary uses a subset of these fixtures

use dxa_core::core::cell::SimulationCell;
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

/// Conventional FCC block of `nx * ny * nz` cells with lattice constant
/// `a`, fully periodic.
pub fn fcc_lattice(a: f64, nx: usize, ny: usize, nz: usize) -> (Vec<Point3<f64>>, SimulationCell) {
    let basis = [
        [0.0, 0.0, 0.0],
        [0.5, 0.5, 0.0],
        [0.5, 0.0, 0.5],
        [0.0, 0.5, 0.5],
    ];
    let mut positions = Vec::with_capacity(4 * nx * ny * nz);
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                for b in &basis {
                    positions.push(Point3::new(
                        (x as f64 + b[0]) * a,
                        (y as f64 + b[1]) * a,
                        (z as f64 + b[2]) * a,
                    ));
                }
            }
        }
    }
    let cell = SimulationCell::orthorhombic(
        nx as f64 * a,
        ny as f64 * a,
        nz as f64 * a,
        [true, true, true],
    )
    .unwrap();
    (positions, cell)
}

/// Conventional BCC block, fully periodic.
pub fn bcc_lattice(a: f64, nx: usize, ny: usize, nz: usize) -> (Vec<Point3<f64>>, SimulationCell) {
    let basis = [[0.0, 0.0, 0.0], [0.5, 0.5, 0.5]];
    let mut positions = Vec::with_capacity(2 * nx * ny * nz);
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                for b in &basis {
                    positions.push(Point3::new(
                        (x as f64 + b[0]) * a,
                        (y as f64 + b[1]) * a,
                        (z as f64 + b[2]) * a,
                    ));
                }
            }
        }
    }
    let cell = SimulationCell::orthorhombic(
        nx as f64 * a,
        ny as f64 * a,
        nz as f64 * a,
        [true, true, true],
    )
    .unwrap();
    (positions, cell)
}

/// Two FCC half-blocks tilted against each other by `tilt_deg` about z,
/// joined at the x midplane, in a large open box. Atoms closer than 60%
/// of the nearest-neighbor distance across the seam are dropped.
pub fn fcc_bicrystal(
    a: f64,
    n: usize,
    tilt_deg: f64,
) -> (Vec<Point3<f64>>, SimulationCell) {
    let half = tilt_deg.to_radians() / 2.0;
    let extent = n as f64 * a;
    let box_len = 3.0 * extent;
    let center = Point3::new(box_len / 2.0, box_len / 2.0, box_len / 2.0);

    let rot_left = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -half)
        .to_rotation_matrix()
        .into_inner();
    let rot_right = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), half)
        .to_rotation_matrix()
        .into_inner();

    let (block, _) = fcc_lattice(a, n, n, n);
    let block_center = Vector3::new(extent / 2.0, extent / 2.0, extent / 2.0);

    // Half-block shift leaves one interplanar spacing of clearance at the
    // seam, so the outermost planes stay bonded across it.
    let mut positions = Vec::new();
    for (rot, side) in [(rot_left, -1.0), (rot_right, 1.0)] {
        let rot: Matrix3<f64> = rot;
        for p in &block {
            let local = rot * (p.coords - block_center);
            let shifted =
                center.coords + local + Vector3::new(side * (extent / 2.0), 0.0, 0.0);
            positions.push(Point3::from(shifted));
        }
    }

    // Remove seam overlaps.
    let min_dist = 0.6 * a / 2f64.sqrt();
    let min_dist_sq = min_dist * min_dist;
    let mut kept: Vec<Point3<f64>> = Vec::with_capacity(positions.len());
    for p in positions {
        if (p.x - center.x).abs() < a
            && kept
                .iter()
                .any(|q| (q.x - center.x).abs() < a && (p - q).norm_squared() < min_dist_sq)
        {
            continue;
        }
        kept.push(p);
    }

    let cell = SimulationCell::orthorhombic(box_len, box_len, box_len, [false, false, false])
        .unwrap();
    (kept, cell)
}
