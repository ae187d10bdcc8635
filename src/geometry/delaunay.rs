use std::collections::HashMap;

use log::debug;
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::core::cell::SimulationCell;
use crate::core::JITTER_EPSILON;
use crate::engine::error::AnalysisError;

/// Index of a cell (tetrahedron) in the finished tessellation.
pub type CellHandle = usize;

/// The six vertex pairs of a tetrahedron.
pub const TETRA_EDGE_VERTICES: [(usize, usize); 6] =
    [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// The four triangular faces of a tetrahedron; face `i` is opposite
/// vertex `i`, ordered so its normal points away from vertex `i` in a
/// positively oriented cell.
pub const TETRA_FACE_VERTICES: [[usize; 3]; 4] =
    [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

#[derive(Debug, Clone)]
struct Tet {
    vertices: [u32; 4],
    /// Adjacent tet across the face opposite each vertex.
    neighbors: [Option<u32>; 4],
    alive: bool,
}

/// A finished tessellation cell.
#[derive(Debug, Clone)]
pub struct Cell {
    pub vertices: [u32; 4],
    /// Adjacent cell across the face opposite each vertex; `None` on the
    /// outer hull.
    pub neighbors: [Option<u32>; 4],
    pub is_ghost: bool,
    /// Dense index among primary (non-ghost) cells, unset for ghosts.
    pub primary_index: Option<u32>,
}

/// 3-D Delaunay tessellation of the primary atoms plus a layer of periodic
/// ghost images, built by incremental Bowyer-Watson insertion. Input
/// points receive a tiny deterministic jitter to break coplanarity
/// degeneracies.
pub struct DelaunayTessellation {
    cell_geometry: SimulationCell,
    points: Vec<Point3<f64>>,
    /// Particle index behind each vertex; ghost vertices map back to the
    /// primary atom they are an image of.
    particle_indices: Vec<u32>,
    primary_vertex_count: usize,
    cells: Vec<Cell>,
    primary_cell_count: usize,
}

impl DelaunayTessellation {
    /// Tessellates `positions` with a ghost layer of width
    /// `ghost_layer_size` along every axis.
    pub fn generate(
        cell: &SimulationCell,
        positions: &[Point3<f64>],
        ghost_layer_size: f64,
    ) -> Result<Self, AnalysisError> {
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        // Primary vertices: wrapped and jittered.
        let mut points: Vec<Point3<f64>> = Vec::with_capacity(positions.len());
        let mut particle_indices: Vec<u32> = Vec::with_capacity(positions.len());
        for (i, p) in positions.iter().enumerate() {
            let wp = cell.wrap_point(p);
            let jitter = Vector3::new(
                rng.gen_range(-JITTER_EPSILON..=JITTER_EPSILON),
                rng.gen_range(-JITTER_EPSILON..=JITTER_EPSILON),
                rng.gen_range(-JITTER_EPSILON..=JITTER_EPSILON),
            );
            points.push(wp + jitter);
            particle_indices.push(i as u32);
        }
        let primary_vertex_count = points.len();

        // Ghost replicas: image copies clipped to a slab of width
        // ghost_layer_size around the cell along each axis.
        let mut stencil_count = [0i64; 3];
        let mut cuts = [[0.0f64; 2]; 3];
        let mut cell_normals = [Vector3::zeros(); 3];
        for dim in 0..3 {
            cell_normals[dim] = cell.cell_normal_vector(dim);
            let origin = cell.reduced_to_absolute_point(&Point3::new(0.0, 0.0, 0.0));
            let corner = cell.reduced_to_absolute_point(&Point3::new(1.0, 1.0, 1.0));
            cuts[dim][0] = cell_normals[dim].dot(&origin.coords) - ghost_layer_size;
            cuts[dim][1] = cell_normals[dim].dot(&corner.coords) + ghost_layer_size;
            if cell.has_pbc(dim) {
                let height = cell.matrix().column(dim).dot(&cell_normals[dim]);
                stencil_count[dim] = (ghost_layer_size / height).ceil().max(1.0) as i64;
            }
        }

        for ix in -stencil_count[0]..=stencil_count[0] {
            for iy in -stencil_count[1]..=stencil_count[1] {
                for iz in -stencil_count[2]..=stencil_count[2] {
                    if ix == 0 && iy == 0 && iz == 0 {
                        continue;
                    }
                    let shift =
                        cell.reduced_to_absolute(&Vector3::new(ix as f64, iy as f64, iz as f64));
                    for v in 0..primary_vertex_count {
                        let image = points[v] + shift;
                        let clipped = (0..3).any(|dim| {
                            let d = cell_normals[dim].dot(&image.coords);
                            d < cuts[dim][0] || d > cuts[dim][1]
                        });
                        if !clipped {
                            points.push(image);
                            particle_indices.push(particle_indices[v]);
                        }
                    }
                }
            }
        }

        let cells = if points.len() >= 4 {
            triangulate(&points)?
        } else {
            Vec::new()
        };

        let mut tessellation = Self {
            cell_geometry: cell.clone(),
            points,
            particle_indices,
            primary_vertex_count,
            cells,
            primary_cell_count: 0,
        };
        tessellation.classify_cells();
        debug!(
            "tessellation: {} vertices ({} primary), {} cells ({} primary)",
            tessellation.points.len(),
            tessellation.primary_vertex_count,
            tessellation.cells.len(),
            tessellation.primary_cell_count
        );
        Ok(tessellation)
    }

    /// Assigns ghost flags and dense primary indices. A cell is a ghost
    /// iff its canonical vertex (minimum particle index, first wins on
    /// ties) is a ghost image.
    fn classify_cells(&mut self) {
        let mut next_primary = 0u32;
        for cell_idx in 0..self.cells.len() {
            let vertices = self.cells[cell_idx].vertices;
            let mut head = vertices[0];
            let mut head_particle = self.particle_indices[head as usize];
            for &v in &vertices[1..] {
                let particle = self.particle_indices[v as usize];
                if particle < head_particle {
                    head = v;
                    head_particle = particle;
                }
            }
            let is_ghost = head as usize >= self.primary_vertex_count;
            let cell = &mut self.cells[cell_idx];
            cell.is_ghost = is_ghost;
            cell.primary_index = if is_ghost {
                None
            } else {
                let idx = next_primary;
                next_primary += 1;
                Some(idx)
            };
        }
        self.primary_cell_count = next_primary as usize;
    }

    pub fn cell(&self) -> &SimulationCell {
        &self.cell_geometry
    }

    pub fn cells(&self) -> impl Iterator<Item = CellHandle> + '_ {
        0..self.cells.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn primary_cell_count(&self) -> usize {
        self.primary_cell_count
    }

    pub fn is_ghost_cell(&self, cell: CellHandle) -> bool {
        self.cells[cell].is_ghost
    }

    pub fn primary_index(&self, cell: CellHandle) -> Option<u32> {
        self.cells[cell].primary_index
    }

    pub fn cell_vertex(&self, cell: CellHandle, corner: usize) -> usize {
        self.cells[cell].vertices[corner] as usize
    }

    /// The cell adjacent across the face opposite `corner`.
    pub fn cell_neighbor(&self, cell: CellHandle, corner: usize) -> Option<CellHandle> {
        self.cells[cell].neighbors[corner].map(|c| c as usize)
    }

    /// Particle index behind a vertex (ghost images map to their atom).
    pub fn vertex_particle(&self, vertex: usize) -> usize {
        self.particle_indices[vertex] as usize
    }

    pub fn is_ghost_vertex(&self, vertex: usize) -> bool {
        vertex >= self.primary_vertex_count
    }

    pub fn vertex_position(&self, vertex: usize) -> &Point3<f64> {
        &self.points[vertex]
    }

    /// Alpha-shape test: whether the cell's squared circumradius is below
    /// `alpha_sq`. Oversized cells belong to open space, not to the solid.
    pub fn alpha_test(&self, cell: CellHandle, alpha_sq: f64) -> bool {
        let v = &self.cells[cell].vertices;
        let p0 = &self.points[v[0] as usize];
        let q = self.points[v[1] as usize] - p0;
        let r = self.points[v[2] as usize] - p0;
        let s = self.points[v[3] as usize] - p0;
        let (qp2, rp2, sp2) = (q.norm_squared(), r.norm_squared(), s.norm_squared());

        let det3 = |a: [f64; 3], b: [f64; 3], c: [f64; 3]| -> f64 {
            a[0] * b[1] * c[2] + a[1] * b[2] * c[0] + a[2] * b[0] * c[1]
                - a[2] * b[1] * c[0]
                - a[1] * b[0] * c[2]
                - a[0] * b[2] * c[1]
        };

        let num_x = det3([q.y, q.z, qp2], [r.y, r.z, rp2], [s.y, s.z, sp2]);
        let num_y = det3([q.x, q.z, qp2], [r.x, r.z, rp2], [s.x, s.z, sp2]);
        let num_z = det3([q.x, q.y, qp2], [r.x, r.y, rp2], [s.x, s.y, sp2]);
        let den = det3([q.x, q.y, q.z], [r.x, r.y, r.z], [s.x, s.y, s.z]);
        if den == 0.0 {
            return false;
        }
        (num_x * num_x + num_y * num_y + num_z * num_z) / (4.0 * den * den) < alpha_sq
    }
}

fn orient3d(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    let u = b - a;
    let v = c - a;
    let w = d - a;
    u.dot(&v.cross(&w))
}

/// Sign of the insphere determinant; combined with the cell orientation,
/// `det * orient < 0` means `e` lies strictly inside the circumsphere of
/// the positively oriented tet `(a, b, c, d)`.
fn insphere(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
    e: &Point3<f64>,
) -> f64 {
    let rows = [a - e, b - e, c - e, d - e];
    let m = nalgebra::Matrix4::from_fn(|i, j| {
        if j < 3 {
            rows[i][j]
        } else {
            rows[i].norm_squared()
        }
    });
    m.determinant()
}

/// Incremental Bowyer-Watson triangulation over the given points. Returns
/// the finished cells with adjacency (super-tet cells removed).
fn triangulate(points: &[Point3<f64>]) -> Result<Vec<Cell>, AnalysisError> {
    let n = points.len();

    // Super-tetrahedron generously enclosing the bounding box.
    let mut lo = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut hi = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        for d in 0..3 {
            lo[d] = lo[d].min(p[d]);
            hi[d] = hi[d].max(p[d]);
        }
    }
    let center = nalgebra::center(&lo, &hi);
    let radius = (hi - lo).norm().max(1.0) * 100.0;
    let mut all_points = points.to_vec();
    let super_base = n as u32;
    all_points.push(center + Vector3::new(radius, radius, radius));
    all_points.push(center + Vector3::new(-radius, -radius, radius));
    all_points.push(center + Vector3::new(-radius, radius, -radius));
    all_points.push(center + Vector3::new(radius, -radius, -radius));

    let mut tets: Vec<Tet> = Vec::new();
    let first = make_tet(
        &all_points,
        [super_base, super_base + 1, super_base + 2, super_base + 3],
    );
    tets.push(first);

    let mut last_alive = 0usize;
    let mut bad: Vec<usize> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    // Cavity membership by insertion stamp, so the scratch array never
    // needs clearing between insertions.
    let mut cavity_stamp: Vec<u32> = Vec::new();

    for p_idx in 0..n {
        let p = all_points[p_idx];
        let stamp = p_idx as u32 + 1;

        let start = locate(&all_points, &tets, last_alive, &p).ok_or_else(|| {
            AnalysisError::TessellationFailed("point location failed".to_string())
        })?;

        // Collect the cavity: every tet whose circumsphere contains p.
        bad.clear();
        stack.clear();
        stack.push(start);
        cavity_stamp.resize(tets.len(), 0);
        cavity_stamp[start] = stamp;
        while let Some(t) = stack.pop() {
            bad.push(t);
            for k in 0..4 {
                if let Some(nb) = tets[t].neighbors[k] {
                    let nb = nb as usize;
                    if cavity_stamp[nb] != stamp
                        && tets[nb].alive
                        && circumsphere_contains(&all_points, &tets[nb], &p)
                    {
                        cavity_stamp[nb] = stamp;
                        stack.push(nb);
                    }
                }
            }
        }

        // Boundary faces of the cavity, with the surviving outside tet.
        let mut boundary: Vec<([u32; 3], Option<u32>)> = Vec::new();
        for &t in &bad {
            for k in 0..4 {
                let outside = match tets[t].neighbors[k] {
                    Some(nb) => {
                        if cavity_stamp[nb as usize] == stamp {
                            continue;
                        }
                        Some(nb)
                    }
                    None => None,
                };
                let f = TETRA_FACE_VERTICES[k];
                boundary.push((
                    [
                        tets[t].vertices[f[0]],
                        tets[t].vertices[f[1]],
                        tets[t].vertices[f[2]],
                    ],
                    outside,
                ));
            }
        }

        for &t in &bad {
            tets[t].alive = false;
        }

        // Retriangulate: one new tet per boundary face, glued to the
        // outside tet and to its cavity siblings via shared edges.
        let mut edge_links: HashMap<(u32, u32), (u32, usize)> = HashMap::new();
        let mut first_new = None;
        for (face, outside) in boundary {
            let new_idx = tets.len() as u32;
            let mut tet = make_tet(&all_points, [face[0], face[1], face[2], p_idx as u32]);
            // Locate the slot of the new point and of the boundary face.
            let p_slot = tet
                .vertices
                .iter()
                .position(|&v| v == p_idx as u32)
                .unwrap();
            tet.neighbors[p_slot] = outside;
            if let Some(out) = outside {
                let out = out as usize;
                // Point the outside tet back at the new one.
                for k in 0..4 {
                    let of = TETRA_FACE_VERTICES[k];
                    let mut ov = [
                        tets[out].vertices[of[0]],
                        tets[out].vertices[of[1]],
                        tets[out].vertices[of[2]],
                    ];
                    let mut fv = face;
                    ov.sort_unstable();
                    fv.sort_unstable();
                    if ov == fv {
                        tets[out].neighbors[k] = Some(new_idx);
                        break;
                    }
                }
            }

            tets.push(tet);
            if first_new.is_none() {
                first_new = Some(new_idx);
            }

            // Each of the three faces through p is shared with the sibling
            // tet built on the boundary face across the same cavity edge.
            let new = tets.len() - 1;
            for k in 0..4 {
                if k == p_slot {
                    continue;
                }
                let f = TETRA_FACE_VERTICES[k];
                let tri = [
                    tets[new].vertices[f[0]],
                    tets[new].vertices[f[1]],
                    tets[new].vertices[f[2]],
                ];
                // The face contains p and a cavity-boundary edge.
                let mut edge: Vec<u32> =
                    tri.iter().copied().filter(|&v| v != p_idx as u32).collect();
                edge.sort_unstable();
                let key = (edge[0], edge[1]);
                match edge_links.remove(&key) {
                    Some((other, other_slot)) => {
                        tets[new].neighbors[k] = Some(other);
                        tets[other as usize].neighbors[other_slot] = Some(new as u32);
                    }
                    None => {
                        edge_links.insert(key, (new as u32, k));
                    }
                }
            }
        }

        last_alive = first_new.map(|f| f as usize).unwrap_or(last_alive);
    }

    // Strip super-tet cells and compact into the final cell array.
    let mut remap: Vec<Option<u32>> = vec![None; tets.len()];
    let mut cells = Vec::new();
    for (i, tet) in tets.iter().enumerate() {
        if !tet.alive || tet.vertices.iter().any(|&v| v >= super_base) {
            continue;
        }
        remap[i] = Some(cells.len() as u32);
        cells.push(Cell {
            vertices: tet.vertices,
            neighbors: [None; 4],
            is_ghost: false,
            primary_index: None,
        });
    }
    for (i, tet) in tets.iter().enumerate() {
        let Some(ci) = remap[i] else { continue };
        for k in 0..4 {
            cells[ci as usize].neighbors[k] =
                tet.neighbors[k].and_then(|nb| remap[nb as usize]);
        }
    }

    Ok(cells)
}

/// Builds a positively oriented tet over the four vertex ids.
fn make_tet(points: &[Point3<f64>], mut vertices: [u32; 4]) -> Tet {
    let orient = orient3d(
        &points[vertices[0] as usize],
        &points[vertices[1] as usize],
        &points[vertices[2] as usize],
        &points[vertices[3] as usize],
    );
    if orient < 0.0 {
        vertices.swap(2, 3);
    }
    Tet {
        vertices,
        neighbors: [None; 4],
        alive: true,
    }
}

fn circumsphere_contains(points: &[Point3<f64>], tet: &Tet, p: &Point3<f64>) -> bool {
    let a = &points[tet.vertices[0] as usize];
    let b = &points[tet.vertices[1] as usize];
    let c = &points[tet.vertices[2] as usize];
    let d = &points[tet.vertices[3] as usize];
    let orient = orient3d(a, b, c, d);
    insphere(a, b, c, d, p) * orient < 0.0
}

/// Walks from `start` toward the tet containing `p`. Falls back to a
/// linear scan if the walk cycles.
fn locate(points: &[Point3<f64>], tets: &[Tet], start: usize, p: &Point3<f64>) -> Option<usize> {
    let mut current = if tets[start].alive {
        start
    } else {
        tets.iter().rposition(|t| t.alive)?
    };

    let mut steps = 0usize;
    let limit = tets.len() * 2 + 64;
    'walk: loop {
        steps += 1;
        if steps > limit {
            break;
        }
        let tet = &tets[current];
        for k in 0..4 {
            let f = TETRA_FACE_VERTICES[k];
            let (a, b, c) = (
                &points[tet.vertices[f[0]] as usize],
                &points[tet.vertices[f[1]] as usize],
                &points[tet.vertices[f[2]] as usize],
            );
            let inner = &points[tet.vertices[k] as usize];
            let side_inner = orient3d(a, b, c, inner);
            let side_p = orient3d(a, b, c, p);
            if side_inner * side_p < 0.0 {
                match tet.neighbors[k] {
                    Some(nb) if tets[nb as usize].alive => {
                        current = nb as usize;
                        continue 'walk;
                    }
                    _ => break 'walk,
                }
            }
        }
        return Some(current);
    }

    // Degenerate walk; scan for any tet whose circumsphere contains p.
    tets.iter()
        .enumerate()
        .find(|(_, t)| t.alive && circumsphere_contains(points, t, p))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insphere_sign_convention() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(0.0, 0.0, 1.0);
        let inside = Point3::new(0.25, 0.25, 0.25);
        let outside = Point3::new(5.0, 5.0, 5.0);
        let orient = orient3d(&a, &b, &c, &d);
        assert!(insphere(&a, &b, &c, &d, &inside) * orient < 0.0);
        assert!(insphere(&a, &b, &c, &d, &outside) * orient > 0.0);
    }

    #[test]
    fn cube_corners_triangulate_fully() {
        let mut points = Vec::new();
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    points.push(Point3::new(
                        x as f64 + 0.001 * (y as f64),
                        y as f64 + 0.002 * (z as f64),
                        z as f64,
                    ));
                }
            }
        }
        let cells = triangulate(&points).unwrap();
        assert!(!cells.is_empty());
        // Total volume of the tets must equal the cube volume.
        let mut volume = 0.0;
        for cell in &cells {
            let a = &points[cell.vertices[0] as usize];
            let b = &points[cell.vertices[1] as usize];
            let c = &points[cell.vertices[2] as usize];
            let d = &points[cell.vertices[3] as usize];
            volume += orient3d(a, b, c, d).abs() / 6.0;
        }
        // Sheared cube volume (the shear keeps it near 1.0).
        assert!((volume - 1.0).abs() < 0.02, "volume = {}", volume);
    }

    #[test]
    fn adjacency_is_symmetric() {
        let mut points = Vec::new();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..60 {
            points.push(Point3::new(
                rng.gen_range(0.0..10.0),
                rng.gen_range(0.0..10.0),
                rng.gen_range(0.0..10.0),
            ));
        }
        let cells = triangulate(&points).unwrap();
        for (i, cell) in cells.iter().enumerate() {
            for k in 0..4 {
                if let Some(nb) = cell.neighbors[k] {
                    let back = cells[nb as usize]
                        .neighbors
                        .iter()
                        .any(|&n| n == Some(i as u32));
                    assert!(back, "cell {} -> {} not symmetric", i, nb);
                }
            }
        }
    }

    #[test]
    fn periodic_tessellation_marks_ghosts() {
        let cell = SimulationCell::orthorhombic(4.0, 4.0, 4.0, [true, true, true]).unwrap();
        let positions = vec![
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(2.5, 0.5, 0.5),
            Point3::new(0.5, 2.5, 0.5),
            Point3::new(0.5, 0.5, 2.5),
            Point3::new(2.5, 2.5, 0.5),
            Point3::new(2.5, 0.5, 2.5),
            Point3::new(0.5, 2.5, 2.5),
            Point3::new(2.5, 2.5, 2.5),
        ];
        let tess = DelaunayTessellation::generate(&cell, &positions, 2.0).unwrap();
        assert!(tess.primary_cell_count() > 0);
        let ghosts = tess.cells().filter(|&c| tess.is_ghost_cell(c)).count();
        assert!(ghosts > 0, "a periodic tessellation must carry ghost cells");
        // Every vertex of every cell maps back to a real particle.
        for c in tess.cells() {
            for corner in 0..4 {
                let v = tess.cell_vertex(c, corner);
                assert!(tess.vertex_particle(v) < positions.len());
            }
        }
    }
}
