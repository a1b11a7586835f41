/*
 * Dependence Graph
 *
 * Directed multigraph of typed nodes and typed edges for one analyzed unit.
 *
 * - petgraph for efficient graph operations
 * - node identity dedup via a side index (add_node is idempotent)
 * - edge legality enforced at insertion time: an illegal combination can
 *   never enter the downstream rule engine
 * - deterministic node_id-ordered iteration for reproducible dumps
 */

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::errors::{Result, RolegraphError};
use crate::shared::models::{Edge, Node, NodeId};

/// Directed multigraph of one extraction unit.
///
/// Tagged with the analyzed unit's name and version, both immutable after
/// construction.
#[derive(Debug)]
pub struct DepGraph {
    graph: DiGraph<Node, Edge>,
    /// Logical node identity to petgraph index. Keyed by node equality, so
    /// re-adding an equal node resolves to the existing index.
    node_index: FxHashMap<Node, NodeIndex>,
    role_name: String,
    role_version: String,
}

/// Serializable DTO for [`DepGraph`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphDto {
    pub role_name: String,
    pub role_version: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EdgeDto {
    pub source: NodeId,
    pub target: NodeId,
    pub edge: Edge,
}

/// Per-kind edge counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub order_edges: usize,
    pub use_edges: usize,
    pub def_edges: usize,
    pub keyword_edges: usize,
}

impl DepGraph {
    pub fn new(role_name: impl Into<String>, role_version: impl Into<String>) -> Self {
        DepGraph {
            graph: DiGraph::new(),
            node_index: FxHashMap::default(),
            role_name: role_name.into(),
            role_version: role_version.into(),
        }
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub fn role_version(&self) -> &str {
        &self.role_version
    }

    /// Add a node, idempotent by node identity-equality.
    ///
    /// Returns the index of the stored node: the existing one when an equal
    /// node is already present, a fresh one otherwise.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(&node) {
            trace!(node_id = node.node_id(), "add_node deduplicated");
            return idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.node_index.insert(node, idx);
        idx
    }

    /// Add a batch of nodes.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Vec<NodeIndex> {
        nodes.into_iter().map(|n| self.add_node(n)).collect()
    }

    /// Add a typed edge between two stored nodes.
    ///
    /// Validates the `(source variant, target variant, kind)` combination
    /// against the legality table; anything else fails with a graph type
    /// error. An exact duplicate `(source, target, edge)` triple is an
    /// idempotent no-op; edges with differing payloads between the same
    /// pair coexist. Returns whether a new edge was inserted.
    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex, edge: Edge) -> Result<bool> {
        let src = self
            .graph
            .node_weight(source)
            .ok_or_else(|| RolegraphError::graph_type("edge source not in graph"))?;
        let dst = self
            .graph
            .node_weight(target)
            .ok_or_else(|| RolegraphError::graph_type("edge target not in graph"))?;

        if !edge_is_legal(src, dst, &edge) {
            return Err(RolegraphError::graph_type(format!(
                "illegal edge {} -> {} with kind {}",
                src.kind_str(),
                dst.kind_str(),
                edge.as_str()
            )));
        }

        let duplicate = self
            .graph
            .edges_connecting(source, target)
            .any(|e| *e.weight() == edge);
        if duplicate {
            trace!(kind = edge.as_str(), "add_edge duplicate ignored");
            return Ok(false);
        }

        self.graph.add_edge(source, target, edge);
        Ok(true)
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(idx)
    }

    /// Index of a logically equal node, if stored.
    pub fn find_node(&self, node: &Node) -> Option<NodeIndex> {
        self.node_index.get(node).copied()
    }

    pub fn contains_node(&self, node: &Node) -> bool {
        self.node_index.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Total number of edges in the multigraph.
    pub fn number_of_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_edge(&self, source: NodeIndex, target: NodeIndex) -> bool {
        self.graph.edges_connecting(source, target).next().is_some()
    }

    pub fn has_edge_kind(&self, source: NodeIndex, target: NodeIndex, edge: &Edge) -> bool {
        self.graph
            .edges_connecting(source, target)
            .any(|e| e.weight() == edge)
    }

    /// Edges between one ordered pair of nodes.
    pub fn edges_between(&self, source: NodeIndex, target: NodeIndex) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self
            .graph
            .edges_connecting(source, target)
            .map(|e| e.weight())
            .collect();
        edges.sort();
        edges
    }

    /// Predecessors in deterministic node_id order.
    pub fn predecessors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut preds: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        preds.sort_by_key(|&i| self.graph[i].node_id());
        preds.dedup();
        preds
    }

    /// Successors in deterministic node_id order.
    pub fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut succs: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        succs.sort_by_key(|&i| self.graph[i].node_id());
        succs.dedup();
        succs
    }

    /// Nodes in deterministic node_id order.
    pub fn nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.graph.node_weights().collect();
        nodes.sort_by_key(|n| n.node_id());
        nodes
    }

    /// Edges as `(source, target, edge)` triples in deterministic order.
    pub fn edges(&self) -> Vec<(&Node, &Node, &Edge)> {
        let mut edges: Vec<(&Node, &Node, &Edge)> = self
            .graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()], e.weight()))
            .collect();
        edges.sort_by(|a, b| {
            (a.0.node_id(), a.1.node_id(), a.2).cmp(&(b.0.node_id(), b.1.node_id(), b.2))
        });
        edges
    }

    /// Check structural completeness invariants of a finished graph.
    ///
    /// Every intermediate value must have at least one connecting edge:
    /// a dangling one means an evaluation produced a result nothing binds
    /// or consumes, which the extraction algorithm never does.
    pub fn validate(&self) -> Result<()> {
        for idx in self.graph.node_indices() {
            if let Node::IntermediateValue(iv) = &self.graph[idx] {
                let connected = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_some()
                    || self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .next()
                        .is_some();
                if !connected {
                    return Err(RolegraphError::graph_type(format!(
                        "intermediate value {} has no connecting edge",
                        iv.identifier
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            order_edges: 0,
            use_edges: 0,
            def_edges: 0,
            keyword_edges: 0,
        };
        for edge in self.graph.edge_weights() {
            match edge {
                Edge::Order { .. } => stats.order_edges += 1,
                Edge::Use => stats.use_edges += 1,
                Edge::Def => stats.def_edges += 1,
                Edge::Keyword { .. } => stats.keyword_edges += 1,
            }
        }
        stats
    }
}

/// Edge legality table.
///
/// | source                              | target            | kinds   |
/// |-------------------------------------|-------------------|---------|
/// | Task                                | Task              | ORDER   |
/// | Variable                            | Expression        | USE     |
/// | Expression, Literal, Task, Variable | Variable          | DEF     |
/// | Expression                          | IntermediateValue | DEF     |
/// | IntermediateValue                   | Variable          | DEF     |
/// | Expression, Literal, Variable       | Task              | KEYWORD |
fn edge_is_legal(source: &Node, target: &Node, edge: &Edge) -> bool {
    match edge {
        Edge::Order { .. } => matches!((source, target), (Node::Task(_), Node::Task(_))),
        Edge::Use => matches!((source, target), (Node::Variable(_), Node::Expression(_))),
        Edge::Def => matches!(
            (source, target),
            (Node::Expression(_), Node::Variable(_))
                | (Node::Literal(_), Node::Variable(_))
                | (Node::Task(_), Node::Variable(_))
                | (Node::Variable(_), Node::Variable(_))
                | (Node::Expression(_), Node::IntermediateValue(_))
                | (Node::IntermediateValue(_), Node::Variable(_))
        ),
        Edge::Keyword { .. } => matches!(
            (source, target),
            (Node::Expression(_), Node::Task(_))
                | (Node::Literal(_), Node::Task(_))
                | (Node::Variable(_), Node::Task(_))
        ),
    }
}

// Custom serde implementation via DTO
impl serde::Serialize for DepGraph {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let dto = GraphDto {
            role_name: self.role_name.clone(),
            role_version: self.role_version.clone(),
            nodes: self.nodes().into_iter().cloned().collect(),
            edges: self
                .edges()
                .into_iter()
                .map(|(s, t, e)| EdgeDto {
                    source: s.node_id(),
                    target: t.node_id(),
                    edge: e.clone(),
                })
                .collect(),
        };
        dto.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for DepGraph {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let dto = GraphDto::deserialize(deserializer)?;
        let mut graph = DepGraph::new(dto.role_name, dto.role_version);

        let mut by_id: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        let mut max_id: Option<NodeId> = None;
        for node in dto.nodes {
            let id = node.node_id();
            max_id = Some(max_id.map_or(id, |m| m.max(id)));
            let idx = graph.add_node(node);
            by_id.insert(id, idx);
        }
        if let Some(max_id) = max_id {
            crate::shared::models::node::reserve_node_ids(max_id);
        }
        for edge in dto.edges {
            let (Some(&src), Some(&dst)) = (by_id.get(&edge.source), by_id.get(&edge.target))
            else {
                return Err(serde::de::Error::custom("edge references unknown node"));
            };
            graph
                .add_edge(src, dst, edge.edge)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(graph)
    }
}
