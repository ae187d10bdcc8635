mod common;

use common::fcc_lattice;
use dxa_core::core::cell::SimulationCell;
use dxa_core::geometry::delaunay::{DelaunayTessellation, TETRA_EDGE_VERTICES};
use nalgebra::Point3;

#[test]
fn empty_input_yields_empty_tessellation() {
    let cell = SimulationCell::orthorhombic(1.0, 1.0, 1.0, [true, true, true]).unwrap();
    let tess = DelaunayTessellation::generate(&cell, &[], 0.5).unwrap();
    assert_eq!(tess.cell_count(), 0);
    assert_eq!(tess.primary_cell_count(), 0);
}

#[test]
fn fcc_lattice_tessellates_with_short_edges() {
    let a = 4.05;
    let (positions, cell) = fcc_lattice(a, 3, 3, 3);
    let nn = a / 2f64.sqrt();
    let tess = DelaunayTessellation::generate(&cell, &positions, 2.0 * nn).unwrap();

    assert!(tess.primary_cell_count() > 0);
    // In a periodic fcc lattice every tetrahedron edge joins first or
    // second neighbors.
    for c in tess.cells() {
        if tess.is_ghost_cell(c) {
            continue;
        }
        for &(i, j) in &TETRA_EDGE_VERTICES {
            let p = tess.vertex_position(tess.cell_vertex(c, i));
            let q = tess.vertex_position(tess.cell_vertex(c, j));
            let d = (p - q).norm();
            assert!(d < a * 1.01, "edge of length {} in a primary cell", d);
        }
    }
}

#[test]
fn primary_cells_get_dense_indices() {
    let (positions, cell) = fcc_lattice(4.05, 2, 2, 2);
    let tess = DelaunayTessellation::generate(&cell, &positions, 3.0).unwrap();
    let mut seen = vec![false; tess.primary_cell_count()];
    for c in tess.cells() {
        match tess.primary_index(c) {
            Some(idx) => {
                assert!(!tess.is_ghost_cell(c));
                assert!(!seen[idx as usize], "duplicate primary index");
                seen[idx as usize] = true;
            }
            None => assert!(tess.is_ghost_cell(c)),
        }
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn alpha_test_separates_small_and_huge_cells() {
    // Two well-separated slabs of points: the tetrahedra bridging the gap
    // have large circumspheres and must fail a tight alpha threshold.
    let mut positions = Vec::new();
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..2 {
                positions.push(Point3::new(x as f64, y as f64, z as f64));
                positions.push(Point3::new(x as f64, y as f64, z as f64 + 12.0));
            }
        }
    }
    let cell = SimulationCell::orthorhombic(30.0, 30.0, 30.0, [false, false, false]).unwrap();
    let tess = DelaunayTessellation::generate(&cell, &positions, 1.0).unwrap();

    let alpha_sq = 2.0 * 2.0;
    let mut small = 0;
    let mut huge = 0;
    for c in tess.cells() {
        if tess.alpha_test(c, alpha_sq) {
            small += 1;
        } else {
            huge += 1;
        }
    }
    assert!(small > 0, "slab interiors must pass the alpha test");
    assert!(huge > 0, "gap-bridging cells must fail the alpha test");
}
