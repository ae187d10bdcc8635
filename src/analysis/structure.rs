use nalgebra::{Matrix3, Point3, Quaternion, UnitQuaternion, Vector3};
use rayon::prelude::*;

use crate::core::cell::SimulationCell;
use crate::core::cluster::ClusterId;
use crate::core::structures::{template_size, template_vector, StructureType};
use crate::engine::error::AnalysisError;
use crate::neighbor::nearest::NearestNeighborFinder;
use crate::analysis::ptm::{PtmKernel, MAX_INPUT_NEIGHBORS};

/// Number of neighbors kept for atoms that failed identification; they
/// still participate in the bond graph used by the crystal path finder.
const OTHER_ATOM_NEIGHBORS: usize = 12;

/// Per-atom results of the identification stage plus the bond graph shared
/// by cluster formation, elastic mapping and path finding.
pub struct StructureAnalysis {
    pub cell: SimulationCell,
    pub positions: Vec<Point3<f64>>,
    pub structure_types: Vec<StructureType>,
    pub orientations: Vec<Quaternion<f64>>,
    /// Per-atom lattice-constant estimate.
    pub scales: Vec<f64>,
    pub rmsds: Vec<f64>,
    /// Neighbor atom indices; ordered by template vertex for crystalline
    /// atoms, by distance for OTHER atoms.
    pub neighbors: Vec<Vec<u32>>,
    /// Ideal lattice vector per neighbor slot, expressed in the frame of
    /// the atom's cluster. Filled by the cluster connector; empty for
    /// OTHER atoms.
    pub lattice_vectors: Vec<Vec<Vector3<f64>>>,
    /// Cluster each atom belongs to; 0 is the amorphous cluster.
    pub atom_clusters: Vec<ClusterId>,
    /// Largest matched neighbor distance over all atoms; bounds the ghost
    /// layer and the alpha-shape threshold.
    pub max_neighbor_distance: f64,
}

impl StructureAnalysis {
    /// Runs per-atom structure identification over all positions.
    pub fn identify(
        positions: &[Point3<f64>],
        cell: &SimulationCell,
        candidates: &[StructureType],
        rmsd_cutoff: f64,
    ) -> Result<Self, AnalysisError> {
        let count = positions.len();
        let finder = NearestNeighborFinder::prepare(MAX_INPUT_NEIGHBORS, positions, cell)?;

        let results: Vec<_> = (0..count)
            .into_par_iter()
            .map_init(
                || PtmKernel::new(&finder, candidates, rmsd_cutoff),
                |kernel, i| kernel.identify(i),
            )
            .collect();

        let mut analysis = Self {
            cell: cell.clone(),
            positions: positions.to_vec(),
            structure_types: Vec::with_capacity(count),
            orientations: Vec::with_capacity(count),
            scales: Vec::with_capacity(count),
            rmsds: Vec::with_capacity(count),
            neighbors: Vec::with_capacity(count),
            lattice_vectors: vec![Vec::new(); count],
            atom_clusters: vec![0; count],
            max_neighbor_distance: 0.0,
        };

        for result in &results {
            analysis.structure_types.push(result.structure);
            analysis.orientations.push(result.orientation);
            analysis.scales.push(result.scale);
            analysis.rmsds.push(result.rmsd);

            let list = if result.structure.is_crystalline() {
                // Template order: slot j holds the atom matched to template
                // vertex j.
                let mut list = Vec::with_capacity(result.correspondence.len());
                for &k in &result.correspondence {
                    let neighbor = &result.neighbors[k as usize];
                    let d = neighbor.delta.norm();
                    if d > analysis.max_neighbor_distance {
                        analysis.max_neighbor_distance = d;
                    }
                    list.push(neighbor.index as u32);
                }
                list
            } else {
                result
                    .neighbors
                    .iter()
                    .take(OTHER_ATOM_NEIGHBORS)
                    .map(|n| n.index as u32)
                    .collect()
            };
            analysis.neighbors.push(list);
        }

        Ok(analysis)
    }

    pub fn atom_count(&self) -> usize {
        self.positions.len()
    }

    pub fn number_of_neighbors(&self, atom: usize) -> usize {
        self.neighbors[atom].len()
    }

    pub fn get_neighbor(&self, atom: usize, slot: usize) -> usize {
        self.neighbors[atom][slot] as usize
    }

    /// Slot of `neighbor` in `atom`'s neighbor list, if present.
    pub fn find_neighbor(&self, atom: usize, neighbor: usize) -> Option<usize> {
        self.neighbors[atom]
            .iter()
            .position(|&n| n as usize == neighbor)
    }

    /// Ideal lattice vector of the bond `(atom, slot)` in the frame of the
    /// atom's cluster. Only valid for crystalline atoms after cluster
    /// formation.
    pub fn neighbor_lattice_vector(&self, atom: usize, slot: usize) -> Vector3<f64> {
        self.lattice_vectors[atom][slot]
    }

    /// Rotation matrix of an atom's PTM orientation.
    pub fn atom_rotation(&self, atom: usize) -> Matrix3<f64> {
        UnitQuaternion::from_quaternion(self.orientations[atom])
            .to_rotation_matrix()
            .into_inner()
    }

    /// The rotation part of a cluster orientation matrix (columns
    /// renormalized to strip the lattice-constant scale).
    pub fn rotation_part(m: &Matrix3<f64>) -> Matrix3<f64> {
        let mut out = *m;
        for c in 0..3 {
            let norm = out.column(c).norm();
            if norm > 0.0 {
                for r in 0..3 {
                    out[(r, c)] /= norm;
                }
            }
        }
        out
    }

    /// Fills `lattice_vectors` for every crystalline atom: each bond's
    /// template vector carried from the atom's own frame into its
    /// cluster's reference frame, snapped onto the exact template vector
    /// it lands on.
    pub fn assign_lattice_vectors(&mut self, cluster_orientations: &[Matrix3<f64>]) {
        let snapped: Vec<Vec<Vector3<f64>>> = (0..self.atom_count())
            .into_par_iter()
            .map(|atom| {
                let structure = self.structure_types[atom];
                if !structure.is_crystalline() || self.atom_clusters[atom] == 0 {
                    return Vec::new();
                }
                let cluster = self.atom_clusters[atom];
                let cluster_rot = Self::rotation_part(&cluster_orientations[cluster]);
                let atom_rot = self.atom_rotation(atom);
                let relative = cluster_rot.transpose() * atom_rot;

                let slots = self.neighbors[atom].len().min(template_size(structure));
                (0..slots)
                    .map(|slot| {
                        let raw = relative * template_vector(structure, slot);
                        snap_to_template(structure, &raw)
                    })
                    .collect()
            })
            .collect();
        self.lattice_vectors = snapped;
    }
}

/// Distance below which a rotated template vector is replaced by the exact
/// template vector it matches.
const SNAP_TOLERANCE: f64 = 0.2;

fn snap_to_template(structure: StructureType, raw: &Vector3<f64>) -> Vector3<f64> {
    let mut best = *raw;
    let mut best_dist = SNAP_TOLERANCE * SNAP_TOLERANCE;
    for slot in 0..template_size(structure) {
        let t = template_vector(structure, slot);
        let dist = (t - raw).norm_squared();
        if dist < best_dist {
            best_dist = dist;
            best = t;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapping_prefers_the_exact_template_vector() {
        let raw = Vector3::new(0.503, 0.498, 0.002);
        let snapped = snap_to_template(StructureType::Fcc, &raw);
        assert_eq!(snapped, Vector3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn snapping_keeps_far_vectors_unchanged() {
        let raw = Vector3::new(0.3, 0.1, 0.2);
        let snapped = snap_to_template(StructureType::Fcc, &raw);
        assert_eq!(snapped, raw);
    }

    #[test]
    fn rotation_part_strips_scale() {
        let m = Matrix3::identity() * 4.05;
        let r = StructureAnalysis::rotation_part(&m);
        assert!((r - Matrix3::identity()).norm() < 1e-12);
    }
}
