pub mod cell;
pub mod cluster;
pub mod dislocations;
pub mod structures;

/// Tolerance for comparing ideal lattice vectors and Burgers closures.
/// Tuned empirically against typical thermal displacement noise.
pub const LATTICE_VECTOR_EPSILON: f64 = 1e-3;

/// Tolerance for comparing cluster transition matrices to each other and
/// to the identity.
pub const TRANSITION_MATRIX_EPSILON: f64 = 1e-4;

/// Tolerance for coincidence of atom/line point positions.
pub const ATOM_VECTOR_EPSILON: f64 = 1e-4;

/// Deterministic jitter amplitude applied to tessellation input points to
/// break coplanarity degeneracies.
pub const JITTER_EPSILON: f64 = 2e-5;

/// Pass-band parameter of the lambda/mu Taubin smoother.
pub const TAUBIN_K_PB: f64 = 0.1;

/// Shrinking weight of the lambda/mu Taubin smoother.
pub const TAUBIN_LAMBDA: f64 = 0.5;
