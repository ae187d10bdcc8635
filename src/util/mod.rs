pub mod bpq;
