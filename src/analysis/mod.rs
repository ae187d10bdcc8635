pub mod connector;
pub mod elastic;
pub mod path;
pub mod ptm;
pub mod smoothing;
pub mod structure;
pub mod tracer;
