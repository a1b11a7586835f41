//! Common data models shared across features.

pub mod edge;
pub mod location;
pub mod node;
pub mod scope;

pub use edge::Edge;
pub use location::{Location, NodeLocation};
pub use node::{
    ExpressionNode, IntermediateValueNode, LiteralNode, LiteralType, Node, NodeId, TaskNode,
    VariableNode,
};
pub use scope::{PrecedenceTable, ScopeKind, DEFAULT_PRECEDENCE_ORDER};
