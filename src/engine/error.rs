use thiserror::Error;

/// Errors surfaced at the analysis boundary. Local per-atom or per-face
/// failures never abort a frame; they degrade into OTHER atoms, missing
/// ideal vectors, or amorphous faces instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A cell vector is too short for the requested cutoff, or a computed
    /// displacement crossed more than half the cell along `axis`.
    #[error("simulation cell is too small along axis {axis}")]
    CellTooSmall { axis: usize },

    /// The cell matrix is singular or contains non-finite entries.
    #[error("invalid simulation cell matrix")]
    InvalidCell,

    /// The Delaunay backend could not triangulate the input even after
    /// degeneracy-breaking jitter.
    #[error("Delaunay tessellation failed: {0}")]
    TessellationFailed(String),

    /// Structure identification found no crystalline atoms at all when the
    /// caller required some.
    #[error("no compatible crystal structure found in input")]
    NoCompatibleCrystal,

    /// An internal invariant was violated.
    #[error("internal consistency failure in {location}")]
    InternalConsistency { location: &'static str },
}
