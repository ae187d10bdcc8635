pub mod cutoff;
pub mod nearest;
