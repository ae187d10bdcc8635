use nalgebra::{Matrix3, Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3};

use crate::core::structures::{template_vectors, StructureType};
use crate::neighbor::nearest::{NearestNeighborFinder, Neighbor};

/// Input limit on the neighbor environment passed to the matcher.
pub const MAX_INPUT_NEIGHBORS: usize = 18;
/// Largest template size produced by the matcher.
pub const MAX_OUTPUT_NEIGHBORS: usize = 16;

/// Default RMSD acceptance threshold.
pub const DEFAULT_RMSD_CUTOFF: f64 = 0.10;

/// Number of alignment restarts per candidate template. The iterative
/// correspondence search only converges locally, so it is restarted from a
/// fixed set of seed rotations.
const ALIGNMENT_RESTARTS: usize = 6;
const ALIGNMENT_ITERATIONS: usize = 4;

/// Outcome of matching one atom against the reference templates.
#[derive(Debug, Clone)]
pub struct PtmResult {
    pub structure: StructureType,
    /// Root-mean-square deviation of the scaled neighbor environment from
    /// the rotated template; meaningful only for crystalline results.
    pub rmsd: f64,
    /// Per-atom lattice-constant estimate (world units per template unit).
    pub scale: f64,
    /// Best-fit rotation carrying template vectors into world directions.
    pub orientation: Quaternion<f64>,
    /// Least-squares deformation gradient of the neighbor environment.
    pub deformation_gradient: Matrix3<f64>,
    /// Correspondence permutation: entry `j` is the position, in the
    /// atom's nearest-neighbor list, matched to template vertex `j`.
    pub correspondence: Vec<u8>,
    /// Index of the matched template variant (single-template types use 0).
    pub template_index: u8,
    /// The nearest-neighbor environment the match was computed from.
    pub neighbors: Vec<Neighbor>,
}

impl PtmResult {
    fn other(neighbors: Vec<Neighbor>) -> Self {
        Self {
            structure: StructureType::Other,
            rmsd: f64::INFINITY,
            scale: 0.0,
            orientation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            deformation_gradient: Matrix3::identity(),
            correspondence: Vec::new(),
            template_index: 0,
            neighbors,
        }
    }
}

/// Polyhedral template matching kernel: classifies one atom at a time by
/// fitting its nearest-neighbor environment against the reference
/// coordination templates with a Horn quaternion alignment.
///
/// Kernels hold per-thread scratch state; create one per worker.
pub struct PtmKernel<'a> {
    finder: &'a NearestNeighborFinder,
    candidates: Vec<StructureType>,
    rmsd_cutoff: f64,
    seed_rotations: Vec<Matrix3<f64>>,
}

impl<'a> PtmKernel<'a> {
    pub fn new(
        finder: &'a NearestNeighborFinder,
        candidates: &[StructureType],
        rmsd_cutoff: f64,
    ) -> Self {
        let axes = [
            Vector3::x_axis(),
            Vector3::y_axis(),
            Vector3::z_axis(),
            nalgebra::Unit::new_normalize(Vector3::new(1.0, 1.0, 1.0)),
            nalgebra::Unit::new_normalize(Vector3::new(1.0, -1.0, 0.0)),
        ];
        let mut seed_rotations = vec![Matrix3::identity()];
        for axis in &axes[..ALIGNMENT_RESTARTS - 1] {
            seed_rotations.push(
                UnitQuaternion::from_axis_angle(axis, std::f64::consts::FRAC_PI_4)
                    .to_rotation_matrix()
                    .into_inner(),
            );
        }
        Self {
            finder,
            candidates: candidates.to_vec(),
            rmsd_cutoff,
            seed_rotations,
        }
    }

    /// Classifies one atom. Returns an `Other` result when no candidate
    /// template fits within the RMSD threshold or the atom has too few
    /// neighbors.
    pub fn identify(&self, particle: usize) -> PtmResult {
        let neighbors = self.finder.query_particle(particle, false);

        let mut best: Option<PtmResult> = None;
        for &candidate in &self.candidates {
            let Some(template) = template_vectors(candidate) else {
                continue;
            };
            if neighbors.len() < template.len() {
                continue;
            }
            if let Some(result) = self.match_template(candidate, template, &neighbors) {
                if result.rmsd <= self.rmsd_cutoff
                    && best.as_ref().map_or(true, |b| result.rmsd < b.rmsd)
                {
                    best = Some(result);
                }
            }
        }

        best.unwrap_or_else(|| PtmResult::other(neighbors))
    }

    fn match_template(
        &self,
        structure: StructureType,
        template: &[[f64; 3]],
        neighbors: &[Neighbor],
    ) -> Option<PtmResult> {
        let n = template.len();

        // Scale both point sets to a unit mean shell radius.
        let neighbor_scale =
            neighbors[..n].iter().map(|nb| nb.delta.norm()).sum::<f64>() / n as f64;
        if neighbor_scale <= 0.0 {
            return None;
        }
        let observed: Vec<Vector3<f64>> = neighbors[..n]
            .iter()
            .map(|nb| nb.delta / neighbor_scale)
            .collect();

        let template_vecs: Vec<Vector3<f64>> = template
            .iter()
            .map(|t| Vector3::new(t[0], t[1], t[2]))
            .collect();
        let template_scale = template_vecs.iter().map(|t| t.norm()).sum::<f64>() / n as f64;
        let reference: Vec<Vector3<f64>> =
            template_vecs.iter().map(|t| t / template_scale).collect();

        let mut best: Option<(f64, Matrix3<f64>, Vec<u8>)> = None;
        for seed in &self.seed_rotations {
            let mut rotation = *seed;
            let mut mapping = Vec::new();
            for _ in 0..ALIGNMENT_ITERATIONS {
                mapping = greedy_correspondence(&reference, &observed, &rotation);
                rotation = horn_rotation(&reference, &observed, &mapping);
            }
            let rmsd = alignment_rmsd(&reference, &observed, &mapping, &rotation);
            if best.as_ref().map_or(true, |(b, _, _)| rmsd < *b) {
                best = Some((rmsd, rotation, mapping));
            }
        }

        let (rmsd, rotation, mapping) = best?;

        // Deformation gradient in the unscaled frames: least squares of
        // observed = F * template over the matched pairs.
        let mut cross = Matrix3::zeros();
        let mut gram = Matrix3::zeros();
        for (j, &k) in mapping.iter().enumerate() {
            let t = template_vecs[j];
            let d = neighbors[k as usize].delta;
            cross += d * t.transpose();
            gram += t * t.transpose();
        }
        let deformation_gradient = gram
            .try_inverse()
            .map(|inv| cross * inv)
            .unwrap_or_else(Matrix3::identity);

        let orientation = UnitQuaternion::from_matrix(&rotation).into_inner();
        Some(PtmResult {
            structure,
            rmsd,
            scale: neighbor_scale / template_scale,
            orientation,
            deformation_gradient,
            correspondence: mapping,
            template_index: 0,
            neighbors: neighbors.to_vec(),
        })
    }
}

/// Pairs every template vertex with the closest unused neighbor direction
/// under the current rotation estimate.
fn greedy_correspondence(
    reference: &[Vector3<f64>],
    observed: &[Vector3<f64>],
    rotation: &Matrix3<f64>,
) -> Vec<u8> {
    let mut used = vec![false; observed.len()];
    let mut mapping = Vec::with_capacity(reference.len());
    for r in reference {
        let target = rotation * r;
        let mut best = None;
        let mut best_dist = f64::INFINITY;
        for (k, o) in observed.iter().enumerate() {
            if used[k] {
                continue;
            }
            let dist = (o - target).norm_squared();
            if dist < best_dist {
                best_dist = dist;
                best = Some(k);
            }
        }
        let k = best.expect("observed set at least as large as template");
        used[k] = true;
        mapping.push(k as u8);
    }
    mapping
}

/// Optimal rotation carrying `reference[j]` onto `observed[mapping[j]]`,
/// computed with Horn's closed-form quaternion method: the rotation is the
/// eigenvector of a 4x4 symmetric matrix with the largest eigenvalue.
fn horn_rotation(
    reference: &[Vector3<f64>],
    observed: &[Vector3<f64>],
    mapping: &[u8],
) -> Matrix3<f64> {
    let mut s = Matrix3::zeros();
    for (j, &k) in mapping.iter().enumerate() {
        s += reference[j] * observed[k as usize].transpose();
    }

    let (sxx, sxy, sxz) = (s[(0, 0)], s[(0, 1)], s[(0, 2)]);
    let (syx, syy, syz) = (s[(1, 0)], s[(1, 1)], s[(1, 2)]);
    let (szx, szy, szz) = (s[(2, 0)], s[(2, 1)], s[(2, 2)]);

    let n = Matrix4::new(
        sxx + syy + szz,
        syz - szy,
        szx - sxz,
        sxy - syx,
        syz - szy,
        sxx - syy - szz,
        sxy + syx,
        szx + sxz,
        szx - sxz,
        sxy + syx,
        -sxx + syy - szz,
        syz + szy,
        sxy - syx,
        szx + sxz,
        syz + szy,
        -sxx - syy + szz,
    );

    let eigen = SymmetricEigen::new(n);
    let mut best = 0;
    for i in 1..4 {
        if eigen.eigenvalues[i] > eigen.eigenvalues[best] {
            best = i;
        }
    }
    let q = eigen.eigenvectors.column(best);
    let quat = Quaternion::new(q[0], q[1], q[2], q[3]);
    UnitQuaternion::from_quaternion(quat)
        .to_rotation_matrix()
        .into_inner()
}

fn alignment_rmsd(
    reference: &[Vector3<f64>],
    observed: &[Vector3<f64>],
    mapping: &[u8],
    rotation: &Matrix3<f64>,
) -> f64 {
    let sum: f64 = mapping
        .iter()
        .enumerate()
        .map(|(j, &k)| (observed[k as usize] - rotation * reference[j]).norm_squared())
        .sum();
    (sum / mapping.len() as f64).sqrt()
}
