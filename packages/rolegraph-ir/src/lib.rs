/*
 * Rolegraph IR - Dependence Graph Extraction Engine
 *
 * Feature-First Hexagonal Architecture:
 * - shared/      : Common models (Node, Edge, ScopeKind, locations)
 * - features/    : Vertical slices (template → environment → var_context → dep_graph → export)
 *
 * Builds program dependence graphs from configuration-management scripts:
 * templated strings become Expression/IntermediateValue chains, variable
 * bindings become versioned Variable nodes, and tasks hang off the graph via
 * ORDER, USE, DEF and KEYWORD edges.
 */

// Crate-level lint configuration
#![allow(clippy::module_inception)] // Module naming intentional
#![allow(clippy::match_like_matches_macro)] // Match for readability
#![allow(clippy::collapsible_if)] // Readability over brevity
#![allow(clippy::new_without_default)] // Default impl not always needed

pub mod errors;
pub mod features;
pub mod shared;

pub use errors::{Result, RolegraphError};
pub use features::dep_graph::{DepGraph, GraphStats};
pub use features::environment::{EnvironmentStack, Initializer, VariableRecord};
pub use features::export::to_dot;
pub use features::template::{AnalysisResult, LookupTarget, TemplateAnalyzer, TemplateParser};
pub use features::var_context::{TemplateResult, VarContext, VisibilityInfo};
pub use shared::models::{
    Edge, LiteralType, Location, Node, NodeId, NodeLocation, PrecedenceTable, ScopeKind,
};
