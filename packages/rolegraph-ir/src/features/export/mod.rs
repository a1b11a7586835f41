//! Graph export surfaces: JSON via serde on [`crate::DepGraph`], GraphViz
//! via [`to_dot`].

pub mod infrastructure;

pub use infrastructure::to_dot;
