//! Dislocation extraction for atomistic simulation snapshots.
//!
//! Given atom positions and a periodic simulation cell, the pipeline
//! identifies per-atom crystalline order, groups atoms into misoriented
//! grains connected by a rotation graph, builds the triangular interface
//! mesh between good crystal and defects, and traces Burgers circuits over
//! that mesh into a network of dislocation lines, each carrying a Burgers
//! vector in a cluster's local lattice frame.
//!
//! The entry point is [`engine::pipeline::analyze`].

pub mod analysis;
pub mod core;
pub mod engine;
pub mod geometry;
pub mod neighbor;
pub mod util;

pub use crate::core::cell::SimulationCell;
pub use crate::core::cluster::{Cluster, ClusterGraph, ClusterTransition, ClusterVector};
pub use crate::core::dislocations::{DislocationNetwork, DislocationSegment};
pub use crate::core::structures::StructureType;
pub use crate::engine::error::AnalysisError;
pub use crate::engine::pipeline::{analyze, FrameOutput, IdentificationMode, Options};
