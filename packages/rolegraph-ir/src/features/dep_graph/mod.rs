//! Dependence graph: typed directed multigraph with identity and legality
//! invariants.

pub mod infrastructure;

pub use infrastructure::{DepGraph, EdgeDto, GraphDto, GraphStats};
