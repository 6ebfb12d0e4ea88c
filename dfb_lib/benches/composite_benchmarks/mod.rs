//! Benchmark categories

pub mod kernels;
pub mod messages;
