//! Dependence graph node model
//!
//! Nodes form a closed tagged union; edge-validity checks and serialization
//! match exhaustively over the variants instead of inspecting open-ended
//! runtime types.
//!
//! Identity rules:
//! - Every node gets a process-lifetime-unique `node_id` at construction.
//!   `node_id` is excluded from equality and hashing but provides the total
//!   order used for deterministic iteration.
//! - `Task`, `Variable` and `Expression` compare structurally over their
//!   semantic fields *including* location.
//! - `Literal` and `IntermediateValue` carry occurrence identity: every
//!   constructed instance is distinct. Literals stand for independent
//!   constant-expression sites and are never merged; intermediate values
//!   stand for one evaluation occasion each.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::location::NodeLocation;
use super::scope::ScopeKind;

/// Process-lifetime-unique node identifier.
pub type NodeId = u64;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Advance the id counter past externally sourced ids (deserialized graphs)
/// so nodes constructed afterwards cannot collide with them.
pub(crate) fn reserve_node_ids(through: NodeId) {
    NODE_ID_COUNTER.fetch_max(through.saturating_add(1), Ordering::Relaxed);
}

/// Type tag of a literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralType {
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Null,
}

impl LiteralType {
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(_) => LiteralType::Str,
            serde_json::Value::Number(n) if n.is_f64() => LiteralType::Float,
            serde_json::Value::Number(_) => LiteralType::Int,
            serde_json::Value::Bool(_) => LiteralType::Bool,
            serde_json::Value::Array(_) => LiteralType::List,
            serde_json::Value::Object(_) => LiteralType::Dict,
            serde_json::Value::Null => LiteralType::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiteralType::Str => "str",
            LiteralType::Int => "int",
            LiteralType::Float => "float",
            LiteralType::Bool => "bool",
            LiteralType::List => "list",
            LiteralType::Dict => "dict",
            LiteralType::Null => "null",
        }
    }
}

/// One scripted action instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub node_id: NodeId,
    /// Action name, non-empty by contract.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<NodeLocation>,
}

/// One version of a named variable in one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableNode {
    pub node_id: NodeId,
    /// Variable name, non-empty by contract.
    pub name: String,
    /// Monotonic per-name version, assigned by the variable context.
    pub version: u32,
    /// Distinguishes re-bindings sharing `version` after cache invalidation.
    pub value_version: u32,
    /// Precedence tier the binding lives in.
    pub scope_level: ScopeKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<NodeLocation>,
}

/// Constant value occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteralNode {
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub literal_type: LiteralType,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<NodeLocation>,
}

/// One templated string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub node_id: NodeId,
    /// Template text, non-empty by contract.
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<NodeLocation>,
}

/// Synthetic node for the value produced by one evaluation occasion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateValueNode {
    pub node_id: NodeId,
    /// Monotonically increasing per extraction unit.
    pub identifier: u64,
}

/// Dependence graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Task(TaskNode),
    Variable(VariableNode),
    Literal(LiteralNode),
    Expression(ExpressionNode),
    IntermediateValue(IntermediateValueNode),
}

impl Node {
    pub fn task(action: impl Into<String>, name: Option<String>, location: Option<NodeLocation>) -> Self {
        let action = action.into();
        debug_assert!(!action.is_empty(), "task action must be non-empty");
        Node::Task(TaskNode {
            node_id: next_node_id(),
            action,
            name,
            location,
        })
    }

    pub fn variable(
        name: impl Into<String>,
        version: u32,
        value_version: u32,
        scope_level: ScopeKind,
        location: Option<NodeLocation>,
    ) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "variable name must be non-empty");
        Node::Variable(VariableNode {
            node_id: next_node_id(),
            name,
            version,
            value_version,
            scope_level,
            location,
        })
    }

    pub fn literal(value: serde_json::Value, location: Option<NodeLocation>) -> Self {
        Node::Literal(LiteralNode {
            node_id: next_node_id(),
            literal_type: LiteralType::of(&value),
            value,
            location,
        })
    }

    pub fn expression(expr: impl Into<String>, location: Option<NodeLocation>) -> Self {
        let expr = expr.into();
        debug_assert!(!expr.is_empty(), "expression text must be non-empty");
        Node::Expression(ExpressionNode {
            node_id: next_node_id(),
            expr,
            location,
        })
    }

    pub fn intermediate_value(identifier: u64) -> Self {
        Node::IntermediateValue(IntermediateValueNode {
            node_id: next_node_id(),
            identifier,
        })
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            Node::Task(n) => n.node_id,
            Node::Variable(n) => n.node_id,
            Node::Literal(n) => n.node_id,
            Node::Expression(n) => n.node_id,
            Node::IntermediateValue(n) => n.node_id,
        }
    }

    pub fn location(&self) -> Option<&NodeLocation> {
        match self {
            Node::Task(n) => n.location.as_ref(),
            Node::Variable(n) => n.location.as_ref(),
            Node::Literal(n) => n.location.as_ref(),
            Node::Expression(n) => n.location.as_ref(),
            Node::IntermediateValue(_) => None,
        }
    }

    /// External type tag, one per variant.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Node::Task(_) => "Task",
            Node::Variable(_) => "Variable",
            Node::Literal(_) => "Literal",
            Node::Expression(_) => "Expression",
            Node::IntermediateValue(_) => "IntermediateValue",
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Task(a), Node::Task(b)) => {
                a.action == b.action && a.name == b.name && a.location == b.location
            }
            (Node::Variable(a), Node::Variable(b)) => {
                a.name == b.name
                    && a.version == b.version
                    && a.value_version == b.value_version
                    && a.scope_level == b.scope_level
                    && a.location == b.location
            }
            // Occurrence identity: literals are independent constant sites.
            (Node::Literal(a), Node::Literal(b)) => a.node_id == b.node_id,
            (Node::Expression(a), Node::Expression(b)) => {
                a.expr == b.expr && a.location == b.location
            }
            (Node::IntermediateValue(a), Node::IntermediateValue(b)) => {
                a.identifier == b.identifier
            }
            _ => false,
        }
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Node::Task(n) => {
                n.action.hash(state);
                n.name.hash(state);
                n.location.hash(state);
            }
            Node::Variable(n) => {
                n.name.hash(state);
                n.version.hash(state);
                n.value_version.hash(state);
                n.scope_level.hash(state);
                n.location.hash(state);
            }
            Node::Literal(n) => n.node_id.hash(state),
            Node::Expression(n) => {
                n.expr.hash(state);
                n.location.hash(state);
            }
            Node::IntermediateValue(n) => n.identifier.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_ids_are_unique() {
        let a = Node::expression("{{ x }}", None);
        let b = Node::expression("{{ x }}", None);
        assert_ne!(a.node_id(), b.node_id());
        // node_id is bookkeeping: structurally identical expressions compare
        // equal regardless.
        assert_eq!(a, b);
    }

    #[test]
    fn test_location_is_part_of_identity() {
        let here = Some(NodeLocation::new("main.yml", 3, 0));
        let there = Some(NodeLocation::new("main.yml", 9, 0));
        assert_ne!(
            Node::expression("{{ x }}", here.clone()),
            Node::expression("{{ x }}", there)
        );
        assert_eq!(
            Node::expression("{{ x }}", here.clone()),
            Node::expression("{{ x }}", here)
        );
    }

    #[test]
    fn test_literals_never_compare_equal_across_occurrences() {
        let a = Node::literal(json!("hello"), None);
        let b = Node::literal(json!("hello"), None);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_intermediate_value_identity_is_identifier() {
        let a = Node::intermediate_value(7);
        let b = Node::intermediate_value(7);
        let c = Node::intermediate_value(8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_literal_type_inference() {
        assert_eq!(LiteralType::of(&json!("s")), LiteralType::Str);
        assert_eq!(LiteralType::of(&json!(3)), LiteralType::Int);
        assert_eq!(LiteralType::of(&json!(3.5)), LiteralType::Float);
        assert_eq!(LiteralType::of(&json!(true)), LiteralType::Bool);
        assert_eq!(LiteralType::of(&json!([1, 2])), LiteralType::List);
        assert_eq!(LiteralType::of(&json!({"k": 1})), LiteralType::Dict);
        assert_eq!(LiteralType::of(&json!(null)), LiteralType::Null);
    }

    #[test]
    fn test_serde_tagging() {
        let node = Node::variable("pkg", 0, 0, ScopeKind::PlayVars, None);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "variable");
        assert_eq!(json["name"], "pkg");
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
