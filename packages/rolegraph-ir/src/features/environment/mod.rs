//! Scoped variable environment with precedence-aware resolution.

pub mod infrastructure;

pub use infrastructure::{EnvironmentStack, Initializer, ScopeId, VariableRecord};
