//! Random strictly serializable histories for testing and benchmarking.

pub mod generator;
