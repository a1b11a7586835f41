/*
 * Variable Context
 *
 * Orchestrates extraction against the dependence graph: scope entry/exit,
 * variable registration, and template evaluation. Owns the environment
 * stack, the intermediate-value counter, the expression-cache stack and the
 * visibility side-table.
 *
 * Evaluation algorithm per template:
 * 1. Delimiter-free, non-conditional text is a literal: a fresh Literal node
 *    every time, no edges.
 * 2. Otherwise analyze the template structurally and classify impurity.
 * 3. Resolve each referenced name to its visible version, recursively
 *    realizing initializer chains (explicit stack with cycle detection).
 * 4. Pure expression + unchanged dependency versions + active cache scope:
 *    reuse the previously created Expression/IntermediateValue pair.
 * 5. Otherwise create the Expression (static variable-free expressions
 *    deduplicate structurally) and a fresh IntermediateValue, wiring USE and
 *    DEF edges.
 *
 * Undefined references are not errors here: they produce an opaque variable
 * node and are left for downstream rule checks.
 */

use petgraph::graph::NodeIndex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::errors::{Result, RolegraphError};
use crate::features::dep_graph::DepGraph;
use crate::features::environment::{EnvironmentStack, Initializer, ScopeId, VariableRecord};
use crate::features::template::{AnalysisResult, TemplateAnalyzer, TemplateParser};
use crate::shared::models::{Edge, Node, NodeLocation, PrecedenceTable, ScopeKind};

use super::super::domain::visibility::VisibilityInfo;
use super::cache::{CacheKey, CacheStack};

/// Result of one template evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateResult {
    /// The node carrying the evaluation's value: an IntermediateValue for
    /// templated text, a Literal for delimiter-free text.
    pub data_node: NodeIndex,
}

/// One referenced variable, resolved.
struct ResolvedDep {
    node: NodeIndex,
    name: String,
    version: u32,
    value_version: u32,
    chain_pure: bool,
}

/// Bookkeeping for one `(name, version)` binding.
#[derive(Debug, Clone, Copy)]
struct Realized {
    node: NodeIndex,
    value_version: u32,
    /// Whether the DEF chain for the binding has been created.
    realized: bool,
    /// Whether the initializer chain is free of impure expressions. An
    /// impure chain forces re-realization on every reference, bumping
    /// `value_version`.
    chain_pure: bool,
}

/// Extraction orchestrator for one script unit.
#[derive(Debug)]
pub struct VarContext {
    env: EnvironmentStack,
    analyzer: TemplateAnalyzer,
    next_iv: u64,
    next_versions: FxHashMap<String, u32>,
    realized: FxHashMap<(String, u32), Realized>,
    /// Opaque nodes for names with no environment record anywhere, reused
    /// per name while the name stays undefined.
    unresolved: FxHashMap<String, NodeIndex>,
    caches: CacheStack,
    /// Whether each open scope carries a cache layer, innermost last.
    scope_cached: Vec<bool>,
    /// Structural dedup of static (variable-free, pure) expressions.
    static_exprs: FxHashMap<String, (NodeIndex, NodeIndex)>,
    /// Names currently being realized; guards initializer cycles.
    resolution_stack: Vec<String>,
    visibility: VisibilityInfo,
    current_location: Option<NodeLocation>,
}

impl VarContext {
    pub fn new() -> Self {
        Self::with_table(PrecedenceTable::default())
    }

    pub fn with_table(table: PrecedenceTable) -> Self {
        Self {
            env: EnvironmentStack::new(table),
            analyzer: TemplateAnalyzer::new(),
            next_iv: 0,
            next_versions: FxHashMap::default(),
            realized: FxHashMap::default(),
            unresolved: FxHashMap::default(),
            caches: CacheStack::default(),
            scope_cached: Vec::new(),
            static_exprs: FxHashMap::default(),
            resolution_stack: Vec::new(),
            visibility: VisibilityInfo::default(),
            current_location: None,
        }
    }

    pub fn environment(&self) -> &EnvironmentStack {
        &self.env
    }

    pub fn visibility(&self) -> &VisibilityInfo {
        &self.visibility
    }

    pub fn into_visibility(self) -> VisibilityInfo {
        self.visibility
    }

    /// Set the source location attributed to subsequently created nodes and
    /// visibility records.
    pub fn set_location(&mut self, location: Option<NodeLocation>) {
        self.current_location = location;
    }

    // -- scopes -------------------------------------------------------------

    /// Push a plain environment frame. Expressions evaluated inside it cache
    /// in whichever cache scope is currently active, or not at all.
    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        self.scope_cached.push(false);
        self.env.enter_scope(kind)
    }

    /// Push an environment frame plus a fresh, isolated expression-cache
    /// layer, discarded entirely when the scope exits.
    pub fn enter_cached_scope(&mut self, kind: ScopeKind) -> ScopeId {
        self.scope_cached.push(true);
        self.caches.push_layer();
        self.env.enter_scope(kind)
    }

    /// Pop the innermost scope (and its cache layer, if it carries one).
    pub fn exit_scope(&mut self) -> Result<()> {
        let cached = self.scope_cached.pop().ok_or_else(|| {
            RolegraphError::scope_underflow("exit_scope without matching enter_scope")
        })?;
        if cached {
            self.caches.pop_layer();
        }
        self.env.exit_scope()
    }

    // -- registration -------------------------------------------------------

    /// Allocate the next version of `name` at the current precedence level
    /// and create its Variable node. The binding is not evaluated yet; the
    /// DEF chain is realized lazily on first reference.
    pub fn register_variable(
        &mut self,
        name: &str,
        initializer: Initializer,
        scope_kind: ScopeKind,
        graph: &mut DepGraph,
    ) -> Result<NodeIndex> {
        let version = self.alloc_version(name);
        debug!(name, version, kind = scope_kind.as_str(), "register variable");
        self.env.set_variable_definition(VariableRecord {
            name: name.to_string(),
            version,
            initializer,
            scope_kind,
        })?;
        let node = graph.add_node(Node::variable(
            name,
            version,
            0,
            scope_kind,
            self.current_location.clone(),
        ));
        self.realized.insert(
            (name.to_string(), version),
            Realized {
                node,
                value_version: 0,
                realized: false,
                chain_pure: true,
            },
        );
        self.unresolved.remove(name);
        self.record_visibility();
        Ok(node)
    }

    /// Register a binding whose value is supplied externally as an existing
    /// data-producing graph node (registered-result style bindings). The DEF
    /// edge from the value node is wired here; the name has no static
    /// initializer and masks weaker layers.
    pub fn register_variable_with_value(
        &mut self,
        name: &str,
        value_node: NodeIndex,
        scope_kind: ScopeKind,
        graph: &mut DepGraph,
    ) -> Result<NodeIndex> {
        let node = self.register_variable(name, Initializer::None, scope_kind, graph)?;
        graph.add_edge(value_node, node, Edge::Def)?;
        if let Some(entry) = self
            .realized
            .values_mut()
            .find(|entry| entry.node == node)
        {
            entry.realized = true;
        }
        Ok(node)
    }

    /// Wire the DEF edge binding an evaluation result to a variable node.
    pub fn bind_variable(
        &mut self,
        data_node: NodeIndex,
        variable: NodeIndex,
        graph: &mut DepGraph,
    ) -> Result<()> {
        graph.add_edge(data_node, variable, Edge::Def).map(|_| ())
    }

    // -- evaluation ---------------------------------------------------------

    /// Evaluate one templated string against the graph.
    pub fn evaluate_template(
        &mut self,
        text: &str,
        graph: &mut DepGraph,
        is_conditional: bool,
    ) -> Result<TemplateResult> {
        let (data_node, _) = self.eval_inner(text, graph, is_conditional)?;
        Ok(TemplateResult { data_node })
    }

    /// Core evaluation; returns the data node and whether the whole chain
    /// (expression plus dependency realizations) is pure.
    fn eval_inner(
        &mut self,
        text: &str,
        graph: &mut DepGraph,
        is_conditional: bool,
    ) -> Result<(NodeIndex, bool)> {
        // Step 1: delimiter-free values are literal constant sites, one
        // fresh node per occurrence.
        if !is_conditional && !TemplateParser::has_delimiters(text) {
            let node = graph.add_node(Node::literal(
                serde_json::Value::String(text.to_string()),
                self.current_location.clone(),
            ));
            self.record_visibility();
            return Ok((node, true));
        }

        // Step 2: structural analysis.
        let analysis = self.analyze(text, is_conditional)?;
        let impure = analysis.is_impure();

        // Step 3: resolve referenced variables in deterministic order.
        let mut names: Vec<String> = analysis.referenced_variables.iter().cloned().collect();
        names.sort();
        let mut deps = Vec::with_capacity(names.len());
        for name in &names {
            deps.push(self.resolve_variable(name, graph)?);
        }
        let deps_pure = deps.iter().all(|d| d.chain_pure);

        // Step 4: cache lookup.
        let key = self.cache_key(text, &deps);
        if !impure {
            if let Some((_, iv_ix)) = self.caches.lookup(&key) {
                trace!(text, "template cache hit");
                self.record_visibility();
                return Ok((iv_ix, deps_pure));
            }
        }

        // Step 6 boundary: static structural dedup applies only with zero
        // referenced variables and no impurity; `now()` with no variables
        // is still re-evaluated every time.
        if deps.is_empty() && !impure {
            if let Some(&(_, iv_ix)) = self.static_exprs.get(key.0.as_str()) {
                trace!(text, "static expression reused");
                self.record_visibility();
                return Ok((iv_ix, true));
            }
        }

        // Step 5: fresh Expression/IntermediateValue pair.
        let expr_ix = graph.add_node(Node::expression(text, self.current_location.clone()));
        let iv_ix = graph.add_node(Node::intermediate_value(self.next_iv));
        self.next_iv += 1;

        for dep in &deps {
            graph.add_edge(dep.node, expr_ix, Edge::Use)?;
        }
        graph.add_edge(expr_ix, iv_ix, Edge::Def)?;

        if !impure {
            if deps.is_empty() {
                self.static_exprs
                    .insert(key.0.clone(), (expr_ix, iv_ix));
            }
            self.caches.insert(key, (expr_ix, iv_ix));
        }
        self.record_visibility();
        Ok((iv_ix, !impure && deps_pure))
    }

    fn analyze(&mut self, text: &str, is_conditional: bool) -> Result<AnalysisResult> {
        if is_conditional {
            // Named conditions resolve through the currently visible static
            // initialisers, one indirection layer.
            let mappings = self.env.get_variable_initialisers();
            self.analyzer.parse_conditional(text, &mappings)
        } else {
            self.analyzer.parse(text)
        }
    }

    fn cache_key(&self, text: &str, deps: &[ResolvedDep]) -> CacheKey {
        let mut snapshot: Vec<(String, u32, u32)> = deps
            .iter()
            .map(|d| (d.name.clone(), d.version, d.value_version))
            .collect();
        snapshot.sort();
        (text.trim().to_string(), snapshot)
    }

    /// Resolve one referenced name to a variable node, realizing its
    /// initializer chain if needed.
    fn resolve_variable(&mut self, name: &str, graph: &mut DepGraph) -> Result<ResolvedDep> {
        let Some(record) = self.env.lookup(name) else {
            return self.resolve_undefined(name, graph);
        };
        let key = (name.to_string(), record.version);

        // A name already on the resolution stack is a dependency cycle;
        // resolve it as opaque instead of recursing.
        if self.resolution_stack.iter().any(|n| n == name) {
            let entry = match self.realized.get(&key) {
                Some(entry) => *entry,
                None => {
                    let node = graph.add_node(Node::variable(
                        name,
                        record.version,
                        0,
                        record.scope_kind,
                        self.current_location.clone(),
                    ));
                    let entry = Realized {
                        node,
                        value_version: 0,
                        realized: true,
                        chain_pure: true,
                    };
                    self.realized.insert(key.clone(), entry);
                    entry
                }
            };
            return Ok(ResolvedDep {
                node: entry.node,
                name: name.to_string(),
                version: record.version,
                value_version: entry.value_version,
                chain_pure: entry.chain_pure,
            });
        }

        let entry = match self.realized.get(&key).copied() {
            Some(entry) if entry.realized && entry.chain_pure => entry,
            Some(entry) if entry.realized => {
                // Impure chain: a re-binding with the same version and the
                // next value_version, re-evaluated from the initializer.
                self.rerealize(name, &record, entry, graph)?
            }
            Some(entry) => self.realize(name, &record, entry, graph)?,
            None => {
                // Visible record without a node yet (defensive; all
                // registrations normally pass through register_variable).
                let node = graph.add_node(Node::variable(
                    name,
                    record.version,
                    0,
                    record.scope_kind,
                    self.current_location.clone(),
                ));
                let entry = Realized {
                    node,
                    value_version: 0,
                    realized: false,
                    chain_pure: true,
                };
                self.realized.insert(key.clone(), entry);
                self.realize(name, &record, entry, graph)?
            }
        };

        Ok(ResolvedDep {
            node: entry.node,
            name: name.to_string(),
            version: record.version,
            value_version: entry.value_version,
            chain_pure: entry.chain_pure,
        })
    }

    /// Create the DEF chain for a binding on first reference.
    fn realize(
        &mut self,
        name: &str,
        record: &VariableRecord,
        mut entry: Realized,
        graph: &mut DepGraph,
    ) -> Result<Realized> {
        match &record.initializer {
            Initializer::Static(init) => {
                let init = init.clone();
                self.resolution_stack.push(name.to_string());
                let result = self.eval_inner(&init, graph, false);
                self.resolution_stack.pop();
                let (data_node, pure) = result?;
                graph.add_edge(data_node, entry.node, Edge::Def)?;
                entry.realized = true;
                entry.chain_pure = pure;
            }
            Initializer::None => {
                // Nothing to evaluate; the binding is opaque.
                entry.realized = true;
                entry.chain_pure = true;
            }
        }
        self.realized
            .insert((name.to_string(), record.version), entry);
        Ok(entry)
    }

    /// Re-evaluate an impure initializer chain, producing a new variable
    /// node with the same version and a bumped value_version.
    fn rerealize(
        &mut self,
        name: &str,
        record: &VariableRecord,
        entry: Realized,
        graph: &mut DepGraph,
    ) -> Result<Realized> {
        let Initializer::Static(init) = &record.initializer else {
            return Ok(entry);
        };
        let init = init.clone();
        let value_version = entry.value_version + 1;
        debug!(name, value_version, "re-realizing impure binding");

        self.resolution_stack.push(name.to_string());
        let result = self.eval_inner(&init, graph, false);
        self.resolution_stack.pop();
        let (data_node, pure) = result?;

        let node = graph.add_node(Node::variable(
            name,
            record.version,
            value_version,
            record.scope_kind,
            self.current_location.clone(),
        ));
        graph.add_edge(data_node, node, Edge::Def)?;

        let entry = Realized {
            node,
            value_version,
            realized: true,
            chain_pure: pure,
        };
        self.realized
            .insert((name.to_string(), record.version), entry);
        Ok(entry)
    }

    /// A name with no environment record anywhere: an opaque reference,
    /// reused per name while it stays undefined. Not an error at this
    /// layer; downstream rule checks decide whether to flag it.
    fn resolve_undefined(&mut self, name: &str, graph: &mut DepGraph) -> Result<ResolvedDep> {
        if let Some(&node) = self.unresolved.get(name) {
            let version = match graph.node(node) {
                Some(Node::Variable(v)) => v.version,
                _ => 0,
            };
            return Ok(ResolvedDep {
                node,
                name: name.to_string(),
                version,
                value_version: 0,
                chain_pure: true,
            });
        }
        let version = self.alloc_version(name);
        let scope_kind = self.env.current_kind().unwrap_or(ScopeKind::RoleDefaults);
        trace!(name, version, "opaque reference to undefined variable");
        let node = graph.add_node(Node::variable(
            name,
            version,
            0,
            scope_kind,
            self.current_location.clone(),
        ));
        self.unresolved.insert(name.to_string(), node);
        Ok(ResolvedDep {
            node,
            name: name.to_string(),
            version,
            value_version: 0,
            chain_pure: true,
        })
    }

    fn alloc_version(&mut self, name: &str) -> u32 {
        let counter = self.next_versions.entry(name.to_string()).or_insert(0);
        let version = *counter;
        *counter += 1;
        version
    }

    fn record_visibility(&mut self) {
        let Some(location) = self.current_location.clone() else {
            return;
        };
        for (name, version) in self.env.get_currently_visible_definitions() {
            self.visibility.record(&name, version, location.clone());
        }
    }
}

impl Default for VarContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::LiteralType;
    use pretty_assertions::assert_eq;

    fn setup() -> (VarContext, DepGraph) {
        (VarContext::new(), DepGraph::new("test_role", "0.0.0"))
    }

    fn init(text: &str) -> Initializer {
        Initializer::Static(text.to_string())
    }

    #[test]
    fn test_literals_are_fresh_per_occurrence() {
        let (mut ctx, mut graph) = setup();
        let a = ctx.evaluate_template("hello", &mut graph, false).unwrap();
        let b = ctx.evaluate_template("hello", &mut graph, false).unwrap();

        assert_ne!(a.data_node, b.data_node);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.number_of_edges(), 0);
        match graph.node(a.data_node) {
            Some(Node::Literal(lit)) => {
                assert_eq!(lit.literal_type, LiteralType::Str);
                assert_eq!(lit.value, serde_json::json!("hello"));
            }
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn test_single_reference_shape() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("target", init("world"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        let tr = ctx
            .evaluate_template("hello {{ target }}", &mut graph, false)
            .unwrap();

        // Literal("world") -> Variable(target) -> Expression -> IntermediateValue
        assert_eq!(graph.node_count(), 4);
        let iv = tr.data_node;
        assert!(matches!(graph.node(iv), Some(Node::IntermediateValue(_))));
        let expr = graph.predecessors(iv)[0];
        assert!(matches!(graph.node(expr), Some(Node::Expression(_))));
        let var = graph.predecessors(expr)[0];
        match graph.node(var) {
            Some(Node::Variable(v)) => {
                assert_eq!(v.name, "target");
                assert_eq!(v.version, 0);
            }
            other => panic!("expected variable, got {other:?}"),
        }
        assert!(graph.has_edge_kind(var, expr, &Edge::Use));
        assert!(graph.has_edge_kind(expr, iv, &Edge::Def));
    }

    #[test]
    fn test_transitive_initializer_chain() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("a", init("{{ b }}"), ScopeKind::PlayVars, &mut graph)
            .unwrap();
        ctx.enter_scope(ScopeKind::TaskVars);
        ctx.register_variable("b", init("1"), ScopeKind::TaskVars, &mut graph)
            .unwrap();

        let tr = ctx.evaluate_template("{{ a }}", &mut graph, false).unwrap();

        // Literal('1') -> Variable(b) -> Expression('{{ b }}') -> IV
        //   -> Variable(a) -> Expression('{{ a }}') -> IV (result)
        assert_eq!(graph.node_count(), 7);
        assert_eq!(graph.number_of_edges(), 6);

        let iv_a = tr.data_node;
        let expr_a = graph.predecessors(iv_a)[0];
        let var_a = graph.predecessors(expr_a)[0];
        let iv_b = graph.predecessors(var_a)[0];
        let expr_b = graph.predecessors(iv_b)[0];
        let var_b = graph.predecessors(expr_b)[0];
        let lit = graph.predecessors(var_b)[0];

        assert!(matches!(graph.node(lit), Some(Node::Literal(_))));
        match graph.node(var_b) {
            Some(Node::Variable(v)) => assert_eq!(v.name, "b"),
            other => panic!("expected variable b, got {other:?}"),
        }
        match graph.node(var_a) {
            Some(Node::Variable(v)) => assert_eq!(v.name, "a"),
            other => panic!("expected variable a, got {other:?}"),
        }
    }

    #[test]
    fn test_cached_scope_reuses_pair() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_cached_scope(ScopeKind::PlayVars);
        ctx.register_variable("x", init("v"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        let tr1 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        let tr2 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        assert_eq!(tr1.data_node, tr2.data_node);

        ctx.exit_scope().unwrap();
    }

    #[test]
    fn test_no_cache_scope_produces_new_pair() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("x", init("v"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        let tr1 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        let tr2 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        assert_ne!(tr1.data_node, tr2.data_node);
    }

    #[test]
    fn test_cache_dies_with_scope() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("x", init("v"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        ctx.enter_cached_scope(ScopeKind::BlockVars);
        let tr1 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        ctx.exit_scope().unwrap();

        ctx.enter_cached_scope(ScopeKind::BlockVars);
        let tr2 = ctx.evaluate_template("{{ x }}", &mut graph, false).unwrap();
        ctx.exit_scope().unwrap();

        assert_ne!(tr1.data_node, tr2.data_node);
    }

    #[test]
    fn test_now_is_never_deduplicated() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_cached_scope(ScopeKind::PlayVars);

        let tr1 = ctx
            .evaluate_template("{{ now() }}", &mut graph, false)
            .unwrap();
        let tr2 = ctx
            .evaluate_template("{{ now() }}", &mut graph, false)
            .unwrap();
        assert_ne!(tr1.data_node, tr2.data_node);
    }

    #[test]
    fn test_static_expression_dedup() {
        let (mut ctx, mut graph) = setup();
        // No cache scope: dedup applies anyway because the expression has
        // zero referenced variables and is pure.
        let tr1 = ctx
            .evaluate_template("{{ 'a' | first }}", &mut graph, false)
            .unwrap();
        let tr2 = ctx
            .evaluate_template("{{ 'a' | first }}", &mut graph, false)
            .unwrap();
        assert_eq!(tr1.data_node, tr2.data_node);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_scope_exit_restores_outer_version() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        let outer = ctx
            .register_variable("a", init("1"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        ctx.enter_scope(ScopeKind::TaskVars);
        let inner = ctx
            .register_variable("a", init("2"), ScopeKind::TaskVars, &mut graph)
            .unwrap();
        assert_ne!(outer, inner);
        ctx.exit_scope().unwrap();

        let tr = ctx.evaluate_template("{{ a }}", &mut graph, false).unwrap();
        let expr = graph.predecessors(tr.data_node)[0];
        let var = graph.predecessors(expr)[0];
        assert_eq!(var, outer);
    }

    #[test]
    fn test_undefined_reference_is_not_an_error() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);

        let tr = ctx
            .evaluate_template("{{ ghost }}", &mut graph, false)
            .unwrap();
        let expr = graph.predecessors(tr.data_node)[0];
        let var = graph.predecessors(expr)[0];
        match graph.node(var) {
            Some(Node::Variable(v)) => assert_eq!(v.name, "ghost"),
            other => panic!("expected opaque variable, got {other:?}"),
        }
        // No DEF chain behind the opaque node.
        assert!(graph.predecessors(var).is_empty());
    }

    #[test]
    fn test_initializer_cycle_resolves_opaquely() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("a", init("{{ b }}"), ScopeKind::PlayVars, &mut graph)
            .unwrap();
        ctx.register_variable("b", init("{{ a }}"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        // Must terminate; the back-reference resolves as opaque.
        let tr = ctx.evaluate_template("{{ a }}", &mut graph, false).unwrap();
        assert!(matches!(
            graph.node(tr.data_node),
            Some(Node::IntermediateValue(_))
        ));
    }

    #[test]
    fn test_impure_chain_bumps_value_version() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_cached_scope(ScopeKind::PlayVars);
        ctx.register_variable("b", init("{{ now() }}"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        let tr1 = ctx.evaluate_template("{{ b }}", &mut graph, false).unwrap();
        let tr2 = ctx.evaluate_template("{{ b }}", &mut graph, false).unwrap();
        // The impure chain defeats the cache even though '{{ b }}' itself
        // is a pure expression.
        assert_ne!(tr1.data_node, tr2.data_node);

        let versions: Vec<(u32, u32)> = graph
            .nodes()
            .iter()
            .filter_map(|n| match n {
                Node::Variable(v) if v.name == "b" => Some((v.version, v.value_version)),
                _ => None,
            })
            .collect();
        assert!(versions.contains(&(0, 0)));
        assert!(versions.contains(&(0, 1)));
    }

    #[test]
    fn test_registered_value_binding() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        let value = graph.add_node(Node::literal(serde_json::json!(42), None));
        let var = ctx
            .register_variable_with_value("result", value, ScopeKind::SetFactsRegistered, &mut graph)
            .unwrap();

        assert!(graph.has_edge_kind(value, var, &Edge::Def));
        // A registered result masks weaker initialisers.
        assert!(!ctx
            .environment()
            .get_variable_initialisers()
            .contains_key("result"));
    }

    #[test]
    fn test_conditional_evaluation() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("count", init("3"), ScopeKind::PlayVars, &mut graph)
            .unwrap();
        ctx.register_variable("flag", init("count > 1"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        // Bare identifier in conditional context; 'flag' itself resolves
        // through its replacement expression to a reference on 'count'.
        let tr = ctx.evaluate_template("flag", &mut graph, true).unwrap();
        let expr = graph.predecessors(tr.data_node)[0];
        let vars: Vec<String> = graph
            .predecessors(expr)
            .iter()
            .filter_map(|&ix| match graph.node(ix) {
                Some(Node::Variable(v)) => Some(v.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(vars, vec!["count".to_string()]);
    }

    #[test]
    fn test_conditional_attribute_access_is_valid_input() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("enabled", init("true"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        // 'service.enabled' reads the attribute of 'service'; the visible
        // 'enabled' initializer must not leak into the attribute position.
        let tr = ctx
            .evaluate_template("service.enabled", &mut graph, true)
            .unwrap();
        let expr = graph.predecessors(tr.data_node)[0];
        let vars: Vec<String> = graph
            .predecessors(expr)
            .iter()
            .filter_map(|&ix| match graph.node(ix) {
                Some(Node::Variable(v)) => Some(v.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(vars, vec!["service".to_string()]);
    }

    #[test]
    fn test_conditional_comparison_keeps_data_dependence() {
        let (mut ctx, mut graph) = setup();
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("count", init("3"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        let tr = ctx
            .evaluate_template("count > 1", &mut graph, true)
            .unwrap();
        let expr = graph.predecessors(tr.data_node)[0];
        let var = graph.predecessors(expr)[0];
        match graph.node(var) {
            Some(Node::Variable(v)) => assert_eq!(v.name, "count"),
            other => panic!("expected variable, got {other:?}"),
        }
        assert!(graph.has_edge_kind(var, expr, &Edge::Use));
        // The initializer chain sits behind the variable node.
        let lit = graph.predecessors(var)[0];
        assert!(matches!(graph.node(lit), Some(Node::Literal(_))));
    }

    #[test]
    fn test_template_syntax_error_propagates() {
        let (mut ctx, mut graph) = setup();
        let err = ctx
            .evaluate_template("{{ broken", &mut graph, false)
            .unwrap_err();
        assert!(matches!(err, RolegraphError::TemplateSyntax { .. }));
    }

    #[test]
    fn test_visibility_tracking() {
        let (mut ctx, mut graph) = setup();
        ctx.set_location(Some(NodeLocation::new("main.yml", 2, 0)));
        ctx.enter_scope(ScopeKind::PlayVars);
        ctx.register_variable("pkg", init("nginx"), ScopeKind::PlayVars, &mut graph)
            .unwrap();

        ctx.set_location(Some(NodeLocation::new("main.yml", 8, 0)));
        ctx.evaluate_template("{{ pkg }}", &mut graph, false)
            .unwrap();

        let locations = ctx.visibility().locations("pkg", 0).unwrap();
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn test_exit_scope_underflow() {
        let (mut ctx, _graph) = setup();
        assert!(ctx.exit_scope().is_err());
    }
}
