pub mod graph;

pub use graph::{DepGraph, EdgeDto, GraphDto, GraphStats};
