use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Local crystalline order assigned to an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StructureType {
    Other = 0,
    Fcc,
    Hcp,
    Bcc,
    Ico,
    Sc,
    CubicDiamond,
    HexDiamond,
}

impl StructureType {
    pub const COUNT: usize = 8;

    /// All types with a reference coordination template.
    pub const IDENTIFIABLE: [StructureType; 6] = [
        StructureType::Fcc,
        StructureType::Hcp,
        StructureType::Bcc,
        StructureType::Sc,
        StructureType::CubicDiamond,
        StructureType::HexDiamond,
    ];

    pub fn is_crystalline(self) -> bool {
        !matches!(self, StructureType::Other | StructureType::Ico)
    }

    /// The rotational point group governing disorientation for this type.
    pub fn symmetry(self) -> Option<SymmetryGroup> {
        match self {
            StructureType::Fcc
            | StructureType::Bcc
            | StructureType::Sc
            | StructureType::CubicDiamond => Some(SymmetryGroup::Cubic),
            StructureType::Hcp | StructureType::HexDiamond => Some(SymmetryGroup::Hexagonal),
            StructureType::Other | StructureType::Ico => None,
        }
    }
}

// Template vectors are expressed in units of the cubic lattice constant
// (or the equivalent a-normalized frame for the hexagonal types), so a
// Burgers vector of (0.5, 0, 0.5) reads as a/2 [101].
const SQRT2_2: f64 = 0.707_106_781_186_547_6;
const SQRT2_4: f64 = 0.353_553_390_593_273_8;
const SQRT6_4: f64 = 0.612_372_435_695_794_5;
const SQRT6_6: f64 = 0.408_248_290_463_863_1;
const SQRT6_12: f64 = 0.204_124_145_231_931_5;
const SQRT3_3: f64 = 0.577_350_269_189_625_8;
const SQRT3_4: f64 = 0.433_012_701_892_219_3;
const SQRT3_12: f64 = 0.144_337_567_297_406_4;

/// Twelve face-centered cubic neighbor directions, pointing from one atom
/// toward the centers of its 12 nearest neighbors.
pub const FCC_VECTORS: [[f64; 3]; 12] = [
    [0.5, 0.5, 0.0],
    [0.0, 0.5, 0.5],
    [0.5, 0.0, 0.5],
    [-0.5, -0.5, 0.0],
    [0.0, -0.5, -0.5],
    [-0.5, 0.0, -0.5],
    [-0.5, 0.5, 0.0],
    [0.0, -0.5, 0.5],
    [-0.5, 0.0, 0.5],
    [0.5, -0.5, 0.0],
    [0.0, 0.5, -0.5],
    [0.5, 0.0, -0.5],
];

/// Hexagonal close-packed neighbor vectors; the first 12 are the nearest
/// neighbors, the remaining 6 complete the fixed direction set of the
/// ideal lattice.
pub const HCP_VECTORS: [[f64; 3]; 18] = [
    [SQRT2_4, -SQRT6_4, 0.0],
    [-SQRT2_2, 0.0, 0.0],
    [-SQRT2_4, SQRT6_12, -SQRT3_3],
    [SQRT2_4, SQRT6_12, -SQRT3_3],
    [0.0, -SQRT6_6, -SQRT3_3],
    [-SQRT2_4, SQRT6_4, 0.0],
    [SQRT2_4, SQRT6_4, 0.0],
    [SQRT2_2, 0.0, 0.0],
    [-SQRT2_4, -SQRT6_4, 0.0],
    [0.0, -SQRT6_6, SQRT3_3],
    [SQRT2_4, SQRT6_12, SQRT3_3],
    [-SQRT2_4, SQRT6_12, SQRT3_3],
    [0.0, SQRT6_6, SQRT3_3],
    [-SQRT2_4, -SQRT6_12, -SQRT3_3],
    [SQRT2_4, -SQRT6_12, SQRT3_3],
    [0.0, SQRT6_6, -SQRT3_3],
    [SQRT2_4, -SQRT6_12, -SQRT3_3],
    [-SQRT2_4, -SQRT6_12, SQRT3_3],
];

/// Fourteen body-centered cubic directions: the 8 corner vectors plus the
/// 6 face-center vectors.
pub const BCC_VECTORS: [[f64; 3]; 14] = [
    [0.5, 0.5, 0.5],
    [-0.5, 0.5, 0.5],
    [0.5, 0.5, -0.5],
    [-0.5, -0.5, 0.5],
    [0.5, -0.5, 0.5],
    [-0.5, 0.5, -0.5],
    [-0.5, -0.5, -0.5],
    [0.5, -0.5, -0.5],
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
];

pub const SC_VECTORS: [[f64; 3]; 6] = [
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
];

/// Cubic diamond: the 4 tetrahedral bonds followed by the 12 second-shell
/// directions of the underlying fcc frame.
pub const CUBIC_DIAMOND_VECTORS: [[f64; 3]; 16] = [
    [0.25, 0.25, 0.25],
    [0.25, -0.25, -0.25],
    [-0.25, -0.25, 0.25],
    [-0.25, 0.25, -0.25],
    [0.0, -0.5, 0.5],
    [0.5, 0.5, 0.0],
    [-0.5, 0.0, 0.5],
    [-0.5, 0.5, 0.0],
    [0.0, 0.5, 0.5],
    [0.5, -0.5, 0.0],
    [0.5, 0.0, 0.5],
    [0.5, 0.0, -0.5],
    [-0.5, -0.5, 0.0],
    [0.0, -0.5, -0.5],
    [0.0, 0.5, -0.5],
    [-0.5, 0.0, -0.5],
];

/// Hexagonal diamond: 4 tetrahedral bonds plus the 12 in-plane/out-of-plane
/// second-shell directions.
pub const HEX_DIAMOND_VECTORS: [[f64; 3]; 16] = [
    [-SQRT2_4, SQRT6_12, -SQRT3_12],
    [0.0, -SQRT6_6, -SQRT3_12],
    [SQRT2_4, SQRT6_12, -SQRT3_12],
    [0.0, 0.0, SQRT3_4],
    [SQRT2_4, -SQRT6_4, 0.0],
    [-SQRT2_2, 0.0, 0.0],
    [-SQRT2_4, SQRT6_4, 0.0],
    [SQRT2_4, SQRT6_4, 0.0],
    [SQRT2_2, 0.0, 0.0],
    [-SQRT2_4, -SQRT6_4, 0.0],
    [-SQRT2_4, SQRT6_12, -SQRT3_3],
    [SQRT2_4, SQRT6_12, -SQRT3_3],
    [0.0, -SQRT6_6, -SQRT3_3],
    [0.0, -SQRT6_6, SQRT3_3],
    [SQRT2_4, SQRT6_12, SQRT3_3],
    [-SQRT2_4, SQRT6_12, SQRT3_3],
];

/// Returns the reference coordination template for a structure type, or
/// `None` for types without one.
pub fn template_vectors(structure: StructureType) -> Option<&'static [[f64; 3]]> {
    match structure {
        StructureType::Fcc => Some(&FCC_VECTORS),
        StructureType::Hcp => Some(&HCP_VECTORS[..12]),
        StructureType::Bcc => Some(&BCC_VECTORS),
        StructureType::Sc => Some(&SC_VECTORS),
        StructureType::CubicDiamond => Some(&CUBIC_DIAMOND_VECTORS),
        StructureType::HexDiamond => Some(&HEX_DIAMOND_VECTORS),
        StructureType::Other | StructureType::Ico => None,
    }
}

/// Number of template neighbors used when matching this type.
pub fn template_size(structure: StructureType) -> usize {
    template_vectors(structure).map_or(0, |t| t.len())
}

pub fn template_vector(structure: StructureType, index: usize) -> Vector3<f64> {
    let v = template_vectors(structure).expect("structure type has no template")[index];
    Vector3::new(v[0], v[1], v[2])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetryGroup {
    Cubic,
    Hexagonal,
}

const S2: f64 = SQRT2_2;

/// The 24 rotational symmetry quaternions (w, x, y, z) of the cubic point
/// group O.
const CUBIC_SYMMETRY: [[f64; 4]; 24] = [
    [1.0, 0.0, 0.0, 0.0],
    [S2, S2, 0.0, 0.0],
    [S2, 0.0, S2, 0.0],
    [S2, 0.0, 0.0, S2],
    [S2, -S2, 0.0, 0.0],
    [S2, 0.0, -S2, 0.0],
    [S2, 0.0, 0.0, -S2],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
    [0.5, 0.5, 0.5, 0.5],
    [0.5, -0.5, 0.5, 0.5],
    [0.5, 0.5, -0.5, 0.5],
    [0.5, 0.5, 0.5, -0.5],
    [0.5, -0.5, -0.5, 0.5],
    [0.5, -0.5, 0.5, -0.5],
    [0.5, 0.5, -0.5, -0.5],
    [0.5, -0.5, -0.5, -0.5],
    [0.0, S2, S2, 0.0],
    [0.0, S2, -S2, 0.0],
    [0.0, S2, 0.0, S2],
    [0.0, S2, 0.0, -S2],
    [0.0, 0.0, S2, S2],
    [0.0, 0.0, S2, -S2],
];

const H: f64 = 0.866_025_403_784_438_6; // cos(30 deg)

/// The 12 rotational symmetry quaternions of the hexagonal point group
/// 622, with the six-fold axis along z.
const HEXAGONAL_SYMMETRY: [[f64; 4]; 12] = [
    [1.0, 0.0, 0.0, 0.0],
    [H, 0.0, 0.0, 0.5],
    [0.5, 0.0, 0.0, H],
    [0.0, 0.0, 0.0, 1.0],
    [0.5, 0.0, 0.0, -H],
    [H, 0.0, 0.0, -0.5],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, H, 0.5, 0.0],
    [0.0, 0.5, H, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, -0.5, H, 0.0],
    [0.0, -H, 0.5, 0.0],
];

impl SymmetryGroup {
    fn operators(self) -> &'static [[f64; 4]] {
        match self {
            SymmetryGroup::Cubic => &CUBIC_SYMMETRY,
            SymmetryGroup::Hexagonal => &HEXAGONAL_SYMMETRY,
        }
    }
}

fn quat(c: [f64; 4]) -> Quaternion<f64> {
    Quaternion::new(c[0], c[1], c[2], c[3])
}

/// Minimum rotation angle in degrees between two orientations modulo the
/// rotational point group `group`. Inputs need not be normalized.
pub fn disorientation(group: SymmetryGroup, qa: &Quaternion<f64>, qb: &Quaternion<f64>) -> f64 {
    if qa.norm() == 0.0 || qb.norm() == 0.0 {
        return f64::INFINITY;
    }
    let qa = qa.normalize();
    let qb = qb.normalize();

    let mut best = 0.0_f64;
    for op in group.operators() {
        let qs = qa * quat(*op);
        // |cos(theta/2)| between the two orientations
        let dot = qs.coords.dot(&qb.coords).abs();
        if dot > best {
            best = dot;
        }
    }
    2.0 * best.min(1.0).acos().to_degrees()
}

/// Disorientation dispatched on the structure type's symmetry group.
/// Returns infinity for mismatched or non-crystalline types.
pub fn structure_disorientation(
    type_a: StructureType,
    type_b: StructureType,
    qa: &Quaternion<f64>,
    qb: &Quaternion<f64>,
) -> f64 {
    if type_a != type_b {
        return f64::INFINITY;
    }
    match type_a.symmetry() {
        Some(group) => disorientation(group, qa, qb),
        None => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    #[test]
    fn fcc_template_has_unit_shell() {
        for v in &FCC_VECTORS {
            let n = Vector3::new(v[0], v[1], v[2]).norm();
            assert!((n - SQRT2_2).abs() < 1e-12);
        }
    }

    #[test]
    fn disorientation_of_identical_orientations_is_zero() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 0.9).into_inner();
        let d = disorientation(SymmetryGroup::Cubic, &q, &q);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn cubic_symmetry_folds_90_degree_rotation_to_zero() {
        let qa = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        // 90 degrees about z is a cubic symmetry operation
        let qb = UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            std::f64::consts::FRAC_PI_2,
        )
        .into_inner();
        let d = disorientation(SymmetryGroup::Cubic, &qa, &qb);
        assert!(d.abs() < 1e-6, "d = {}", d);
    }

    #[test]
    fn small_tilt_is_reported_exactly() {
        let qa = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let qb = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 5.0_f64.to_radians())
            .into_inner();
        let d = disorientation(SymmetryGroup::Cubic, &qa, &qb);
        assert!((d - 5.0).abs() < 1e-6, "d = {}", d);
    }

    #[test]
    fn hexagonal_sixfold_axis_folds() {
        let qa = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let qb = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 60.0_f64.to_radians())
            .into_inner();
        let d = disorientation(SymmetryGroup::Hexagonal, &qa, &qb);
        assert!(d.abs() < 1e-6, "d = {}", d);
    }

    #[test]
    fn mismatched_types_never_compatible() {
        let q = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let d = structure_disorientation(StructureType::Fcc, StructureType::Bcc, &q, &q);
        assert!(d.is_infinite());
    }
}
