//! GraphViz export
//!
//! Renders a dependence graph as a `dot` digraph for inspection. Output is
//! deterministic: nodes in `node_id` order, edges sorted by endpoint ids and
//! edge kind, so snapshots diff cleanly across runs.

use std::fmt::Write as _;

use crate::features::dep_graph::DepGraph;
use crate::shared::models::Node;

/// Render `graph` in GraphViz dot syntax.
pub fn to_dot(graph: &DepGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(graph.role_name()));
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, fontname=\"monospace\"];");

    for node in graph.nodes() {
        let _ = writeln!(
            out,
            "  n{} [label=\"{}\"{}];",
            node.node_id(),
            escape(&node_label(node)),
            node_attrs(node)
        );
    }

    let mut edges: Vec<(u64, u64, &'static str)> = graph
        .edges()
        .into_iter()
        .map(|(src, dst, edge)| (src.node_id(), dst.node_id(), edge.as_str()))
        .collect();
    edges.sort();
    for (src, dst, label) in edges {
        let _ = writeln!(out, "  n{src} -> n{dst} [label=\"{label}\"];");
    }

    out.push_str("}\n");
    out
}

fn node_label(node: &Node) -> String {
    match node {
        Node::Task(n) => match &n.name {
            Some(name) => format!("Task: {} ({})", n.action, name),
            None => format!("Task: {}", n.action),
        },
        Node::Variable(n) => {
            format!("Variable: {} v{}.{}", n.name, n.version, n.value_version)
        }
        Node::Literal(n) => format!("Literal[{}]: {}", n.literal_type.as_str(), n.value),
        Node::Expression(n) => format!("Expression: {}", n.expr),
        Node::IntermediateValue(n) => format!("IV#{}", n.identifier),
    }
}

fn node_attrs(node: &Node) -> &'static str {
    match node {
        Node::Task(_) => ", style=filled, fillcolor=lightblue",
        Node::Variable(_) => ", style=filled, fillcolor=lightyellow",
        Node::IntermediateValue(_) => ", shape=ellipse",
        Node::Literal(_) | Node::Expression(_) => "",
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Edge;

    #[test]
    fn test_dot_rendering_is_deterministic() {
        let mut graph = DepGraph::new("web_server", "1.0.0");
        let var = graph.add_node(Node::variable(
            "pkg",
            0,
            0,
            crate::shared::models::ScopeKind::PlayVars,
            None,
        ));
        let expr = graph.add_node(Node::expression("{{ pkg }}", None));
        let iv = graph.add_node(Node::intermediate_value(0));
        graph.add_edge(var, expr, Edge::Use).unwrap();
        graph.add_edge(expr, iv, Edge::Def).unwrap();

        let rendered = to_dot(&graph);
        assert!(rendered.starts_with("digraph \"web_server\" {"));
        assert!(rendered.contains("Variable: pkg v0.0"));
        assert!(rendered.contains("[label=\"USE\"]"));
        assert!(rendered.contains("[label=\"DEF\"]"));
        assert_eq!(rendered, to_dot(&graph));
    }

    #[test]
    fn test_quotes_are_escaped() {
        let mut graph = DepGraph::new("r", "0.0.0");
        graph.add_node(Node::expression("{{ \"a\" ~ b }}", None));
        let rendered = to_dot(&graph);
        assert!(rendered.contains("\\\"a\\\""));
    }
}
