pub mod closure;
pub mod dependency;
pub mod digraph;
pub mod matrix;
pub mod vertex;

pub use closure::TransitiveClosure;
pub use dependency::DependencyGraph;
pub use vertex::{Edge, Timeline, Vertex};
