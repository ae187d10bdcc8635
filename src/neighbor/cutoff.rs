use nalgebra::{Point3, Vector3};

use crate::core::cell::SimulationCell;
use crate::engine::error::AnalysisError;

/// A neighbor returned by a cutoff query.
#[derive(Debug, Clone, Copy)]
pub struct CutoffNeighbor {
    pub index: usize,
    /// Displacement from the central particle to this neighbor image.
    pub delta: Vector3<f64>,
    pub distance_sq: f64,
    /// Integer periodic shift of the neighbor image relative to the
    /// wrapped neighbor position.
    pub pbc_shift: Vector3<i8>,
}

/// Finds all particles within a fixed cutoff radius of a central particle
/// by sorting particles into a grid of bin cells and scanning a stencil of
/// adjacent (possibly periodic-image) bins.
#[derive(Debug)]
pub struct CutoffNeighborFinder {
    cutoff: f64,
    cutoff_sq: f64,
    cell: SimulationCell,
    bin_dim: [usize; 3],
    /// Linked list heads per bin and next-pointers per particle.
    bins: Vec<Option<u32>>,
    next_in_bin: Vec<Option<u32>>,
    positions: Vec<Point3<f64>>,
    /// Wrapping shift applied to each input position, in cell-vector units.
    wrap_shifts: Vec<Vector3<i8>>,
    /// Stencil of bin offsets to visit around the center bin.
    stencil: Vec<[i64; 3]>,
}

impl CutoffNeighborFinder {
    /// Prepares the finder. Fails with `CellTooSmall` if a periodic cell
    /// axis cannot hold two cutoff spheres side by side (minimum-image
    /// arithmetic would be ambiguous below that).
    pub fn prepare(
        cutoff: f64,
        positions: &[Point3<f64>],
        cell: &SimulationCell,
    ) -> Result<Self, AnalysisError> {
        assert!(cutoff > 0.0);

        let mut bin_dim = [1usize; 3];
        let mut stencil_range = [1i64; 3];
        for dim in 0..3 {
            let width = cell
                .cell_normal_vector(dim)
                .dot(&cell.matrix().column(dim));
            if cell.has_pbc(dim) && width < 2.0 * cutoff {
                return Err(AnalysisError::CellTooSmall { axis: dim });
            }
            bin_dim[dim] = ((width / cutoff).floor() as usize).clamp(1, 64);
            let edge = width / bin_dim[dim] as f64;
            stencil_range[dim] = (cutoff / edge).ceil() as i64;
        }

        let mut stencil = Vec::new();
        for ix in -stencil_range[0]..=stencil_range[0] {
            for iy in -stencil_range[1]..=stencil_range[1] {
                for iz in -stencil_range[2]..=stencil_range[2] {
                    stencil.push([ix, iy, iz]);
                }
            }
        }

        let mut finder = Self {
            cutoff,
            cutoff_sq: cutoff * cutoff,
            cell: cell.clone(),
            bin_dim,
            bins: vec![None; bin_dim[0] * bin_dim[1] * bin_dim[2]],
            next_in_bin: vec![None; positions.len()],
            positions: Vec::with_capacity(positions.len()),
            wrap_shifts: Vec::with_capacity(positions.len()),
            stencil,
        };

        for (i, p) in positions.iter().enumerate() {
            let wrapped = cell.wrap_point(p);
            let shift_abs = wrapped - p;
            let shift_red = cell.absolute_to_reduced(&shift_abs);
            finder.wrap_shifts.push(Vector3::new(
                shift_red.x.round() as i8,
                shift_red.y.round() as i8,
                shift_red.z.round() as i8,
            ));
            let bin = finder.bin_of(&wrapped);
            finder.next_in_bin[i] = finder.bins[bin];
            finder.bins[bin] = Some(i as u32);
            finder.positions.push(wrapped);
        }

        Ok(finder)
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn cutoff_sq(&self) -> f64 {
        self.cutoff_sq
    }

    pub fn particle_count(&self) -> usize {
        self.positions.len()
    }

    fn bin_of(&self, p: &Point3<f64>) -> usize {
        let r = self.cell.absolute_to_reduced_point(p);
        let mut idx = [0usize; 3];
        for dim in 0..3 {
            let n = self.bin_dim[dim] as i64;
            let b = (r[dim] * n as f64).floor() as i64;
            idx[dim] = if self.cell.has_pbc(dim) {
                SimulationCell::modulo_int(b, n) as usize
            } else {
                b.clamp(0, n - 1) as usize
            };
        }
        (idx[2] * self.bin_dim[1] + idx[1]) * self.bin_dim[0] + idx[0]
    }

    /// Collects every neighbor image within the cutoff of particle `index`.
    /// Order is deterministic for a fixed input but otherwise unspecified.
    pub fn neighbors(&self, index: usize) -> Vec<CutoffNeighbor> {
        let center = self.positions[index];
        let r = self.cell.absolute_to_reduced_point(&center);
        let mut center_bin = [0i64; 3];
        for dim in 0..3 {
            let n = self.bin_dim[dim] as i64;
            let b = (r[dim] * n as f64).floor() as i64;
            center_bin[dim] = if self.cell.has_pbc(dim) {
                SimulationCell::modulo_int(b, n)
            } else {
                b.clamp(0, n - 1)
            };
        }

        let mut out = Vec::new();
        for offset in &self.stencil {
            let mut bin_idx = [0usize; 3];
            let mut image_shift = Vector3::<i8>::zeros();
            let mut skip = false;
            for dim in 0..3 {
                let n = self.bin_dim[dim] as i64;
                let raw = center_bin[dim] + offset[dim];
                if self.cell.has_pbc(dim) {
                    bin_idx[dim] = SimulationCell::modulo_int(raw, n) as usize;
                    image_shift[dim] = raw.div_euclid(n) as i8;
                } else if raw < 0 || raw >= n {
                    skip = true;
                    break;
                } else {
                    bin_idx[dim] = raw as usize;
                }
            }
            if skip {
                continue;
            }

            let shift_vec = self.cell.reduced_to_absolute(&Vector3::new(
                image_shift[0] as f64,
                image_shift[1] as f64,
                image_shift[2] as f64,
            ));

            let bin = (bin_idx[2] * self.bin_dim[1] + bin_idx[1]) * self.bin_dim[0] + bin_idx[0];
            let mut cursor = self.bins[bin];
            while let Some(j) = cursor {
                let j = j as usize;
                let delta = self.positions[j] + shift_vec - center;
                let distance_sq = delta.norm_squared();
                if distance_sq <= self.cutoff_sq
                    && !(j == index && image_shift == Vector3::zeros())
                {
                    out.push(CutoffNeighbor {
                        index: j,
                        delta,
                        distance_sq,
                        pbc_shift: image_shift,
                    });
                }
                cursor = self.next_in_bin[j];
            }
        }
        out
    }

    /// The periodic shift of a neighbor vector as if neither endpoint had
    /// been wrapped into the primary cell.
    pub fn unwrapped_pbc_shift(&self, neighbor: &CutoffNeighbor, center: usize) -> Vector3<i8> {
        let s1 = self.wrap_shifts[center];
        let s2 = self.wrap_shifts[neighbor.index];
        neighbor.pbc_shift - s1 + s2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_periodic_images() {
        let cell = SimulationCell::orthorhombic(10.0, 10.0, 10.0, [true, true, true]).unwrap();
        let positions = vec![Point3::new(0.5, 5.0, 5.0), Point3::new(9.5, 5.0, 5.0)];
        let finder = CutoffNeighborFinder::prepare(2.0, &positions, &cell).unwrap();
        let neighbors = finder.neighbors(0);
        assert_eq!(neighbors.len(), 1);
        let n = &neighbors[0];
        assert_eq!(n.index, 1);
        assert!((n.distance_sq - 1.0).abs() < 1e-12);
        assert!((n.delta - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn respects_cutoff() {
        let cell = SimulationCell::orthorhombic(20.0, 20.0, 20.0, [true, true, true]).unwrap();
        let positions = vec![
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(3.0, 1.0, 1.0),
            Point3::new(10.0, 10.0, 10.0),
        ];
        let finder = CutoffNeighborFinder::prepare(2.5, &positions, &cell).unwrap();
        let neighbors = finder.neighbors(0);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].index, 1);
    }

    #[test]
    fn too_small_cell_is_an_error() {
        let cell = SimulationCell::orthorhombic(3.0, 20.0, 20.0, [true, true, true]).unwrap();
        let positions = vec![Point3::origin()];
        match CutoffNeighborFinder::prepare(2.0, &positions, &cell) {
            Err(AnalysisError::CellTooSmall { axis }) => assert_eq!(axis, 0),
            other => panic!("expected CellTooSmall, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn open_boundaries_generate_no_images() {
        let cell = SimulationCell::orthorhombic(10.0, 10.0, 10.0, [false, false, false]).unwrap();
        let positions = vec![Point3::new(0.5, 5.0, 5.0), Point3::new(9.5, 5.0, 5.0)];
        let finder = CutoffNeighborFinder::prepare(2.0, &positions, &cell).unwrap();
        assert!(finder.neighbors(0).is_empty());
    }
}
