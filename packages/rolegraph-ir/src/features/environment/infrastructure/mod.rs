pub mod stack;

pub use stack::{EnvironmentStack, Initializer, ScopeId, VariableRecord};
