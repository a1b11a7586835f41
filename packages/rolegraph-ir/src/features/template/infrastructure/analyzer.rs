//! Template expression analysis
//!
//! Structural analysis of a parsed template: which free variables it reads,
//! which filters and tests it applies, which lookup plugins it invokes and
//! whether it touches the current-time builtin. No evaluation happens here;
//! impurity is a decidable static property of the tree.

use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::features::template::domain::ast::{BinOp, Expr, Template, TemplateNode, UnaryOp};

use super::parser::TemplateParser;

/// Filters whose output is not a pure function of their inputs.
static IMPURE_FILTERS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    ["random", "shuffle", "password_hash", "to_uuid"]
        .into_iter()
        .collect()
});

/// Tests that depend on the execution environment.
static IMPURE_TESTS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| ["exists"].into_iter().collect());

/// Lookup plugin invocation discovered in an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupTarget {
    /// Plugin named by a string literal: `lookup('file', ...)`.
    Literal(String),
    /// Plugin named by a variable reference: `lookup(plugin_var, ...)`.
    Variable(String),
}

/// Structural facts about one template expression.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Free variable names. Quoted string literals and literal lookup-target
    /// names are excluded; loop targets and `set` targets are bound locally.
    pub referenced_variables: FxHashSet<String>,
    pub used_filters: FxHashSet<String>,
    pub used_tests: FxHashSet<String>,
    pub used_lookups: Vec<LookupTarget>,
    /// Any lookup-style call was found, whatever its first argument's form.
    pub uses_lookup: bool,
    /// The current-time builtin is invoked somewhere.
    pub uses_now: bool,
    /// Parse tree, exposed for downstream inspection.
    pub ast_root: Template,
}

impl AnalysisResult {
    /// An impure expression is not reproducible from its statically known
    /// inputs: time-dependent, random or environment-dependent.
    pub fn is_impure(&self) -> bool {
        self.uses_now
            || self.uses_lookup
            || self
                .used_filters
                .iter()
                .any(|f| IMPURE_FILTERS.contains(f.as_str()))
            || self
                .used_tests
                .iter()
                .any(|t| IMPURE_TESTS.contains(t.as_str()))
    }
}

/// Stateless analyzer over a shared [`TemplateParser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateAnalyzer {
    parser: TemplateParser,
}

impl TemplateAnalyzer {
    pub fn new() -> Self {
        Self {
            parser: TemplateParser::new(),
        }
    }

    /// Analyze a templated string (non-conditional context).
    pub fn parse(&self, expr: &str) -> Result<AnalysisResult> {
        let template = self.parser.parse(expr)?;
        Ok(analyze(template))
    }

    /// Analyze a conditional expression.
    ///
    /// Bare identifiers are references; a named condition — an identifier
    /// standing in truth-value position whose name is listed in
    /// `variable_mappings` — is substituted with its replacement expression
    /// (one indirection layer) after parsing.
    pub fn parse_conditional(
        &self,
        expr: &str,
        variable_mappings: &FxHashMap<String, String>,
    ) -> Result<AnalysisResult> {
        let root = self.parser.parse_expression(expr)?;
        let root = substitute_conditions(root, variable_mappings, &self.parser);
        Ok(analyze(Template {
            nodes: vec![TemplateNode::Output(root)],
        }))
    }
}

/// Replace named conditions with their mapped replacement expression.
///
/// A named condition is an identifier that is itself a whole condition: the
/// expression root, an operand of `and`/`or`/`not`, or a branch of an inline
/// conditional. Names in any other position — comparison operands, attribute
/// bases and names, indexes, call and filter arguments — are plain variable
/// references and stay untouched, keeping their data dependence visible.
/// Substitution is one layer deep: replacements are not substituted again.
fn substitute_conditions(
    expr: Expr,
    mappings: &FxHashMap<String, String>,
    parser: &TemplateParser,
) -> Expr {
    match expr {
        Expr::Name(name) => match mappings.get(&name).and_then(|r| parse_replacement(r, parser)) {
            Some(replacement) => replacement,
            None => Expr::Name(name),
        },
        Expr::Binary {
            op: op @ (BinOp::And | BinOp::Or),
            left,
            right,
        } => Expr::Binary {
            op,
            left: Box::new(substitute_conditions(*left, mappings, parser)),
            right: Box::new(substitute_conditions(*right, mappings, parser)),
        },
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(substitute_conditions(*operand, mappings, parser)),
        },
        Expr::Cond {
            test,
            then,
            otherwise,
        } => Expr::Cond {
            test: Box::new(substitute_conditions(*test, mappings, parser)),
            then: Box::new(substitute_conditions(*then, mappings, parser)),
            otherwise: otherwise
                .map(|o| Box::new(substitute_conditions(*o, mappings, parser))),
        },
        other => other,
    }
}

/// Parse the usable body of a replacement expression.
///
/// A replacement that is itself a single `{{ expr }}` template has its
/// delimiters stripped; one with any other embedded delimiter form, or that
/// does not parse as an expression, is rejected and the identifier stays a
/// plain reference.
fn parse_replacement(replacement: &str, parser: &TemplateParser) -> Option<Expr> {
    let trimmed = replacement.trim();
    let body = if TemplateParser::has_delimiters(trimmed) {
        let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
        if TemplateParser::has_delimiters(inner) {
            return None;
        }
        inner.trim()
    } else {
        trimmed
    };
    parser.parse_expression(body).ok()
}

/// Walk one parsed template and collect analysis facts.
fn analyze(template: Template) -> AnalysisResult {
    let mut walker = Walker::default();
    walker.walk_body(&template.nodes);
    AnalysisResult {
        referenced_variables: walker.referenced,
        used_filters: walker.filters,
        used_tests: walker.tests,
        used_lookups: walker.lookups,
        uses_lookup: walker.uses_lookup,
        uses_now: walker.uses_now,
        ast_root: template,
    }
}

#[derive(Default)]
struct Walker {
    referenced: FxHashSet<String>,
    filters: FxHashSet<String>,
    tests: FxHashSet<String>,
    lookups: Vec<LookupTarget>,
    uses_lookup: bool,
    uses_now: bool,
    /// Locally bound names (loop targets, `set` targets), one frame per
    /// enclosing binder.
    locals: Vec<FxHashSet<String>>,
}

impl Walker {
    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|frame| frame.contains(name))
    }

    fn walk_body(&mut self, body: &[TemplateNode]) {
        for node in body {
            match node {
                TemplateNode::Text(_) => {}
                TemplateNode::Output(expr) => self.walk_expr(expr),
                TemplateNode::If {
                    branches,
                    else_body,
                } => {
                    for (cond, branch) in branches {
                        self.walk_expr(cond);
                        self.walk_body(branch);
                    }
                    if let Some(body) = else_body {
                        self.walk_body(body);
                    }
                }
                TemplateNode::For {
                    targets,
                    iter,
                    body,
                } => {
                    self.walk_expr(iter);
                    self.locals.push(targets.iter().cloned().collect());
                    self.walk_body(body);
                    self.locals.pop();
                }
                TemplateNode::Set { target, value } => {
                    self.walk_expr(value);
                    // A set target shadows the name for the rest of the
                    // template body.
                    if self.locals.is_empty() {
                        self.locals.push(FxHashSet::default());
                    }
                    if let Some(frame) = self.locals.last_mut() {
                        frame.insert(target.clone());
                    }
                }
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Str(_) | Expr::Int(_) | Expr::Float(_) | Expr::Bool(_) | Expr::Null => {}
            Expr::Name(name) => {
                if !self.is_local(name) {
                    self.referenced.insert(name.clone());
                }
            }
            Expr::List(items) => {
                for item in items {
                    self.walk_expr(item);
                }
            }
            Expr::Dict(entries) => {
                for (key, value) in entries {
                    self.walk_expr(key);
                    self.walk_expr(value);
                }
            }
            Expr::Attr { base, .. } => self.walk_expr(base),
            Expr::Index { base, index } => {
                self.walk_expr(base);
                self.walk_expr(index);
            }
            Expr::Call { func, args, kwargs } => self.walk_call(func, args, kwargs),
            Expr::Filter {
                value,
                name,
                args,
                kwargs,
            } => {
                self.filters.insert(name.clone());
                self.walk_expr(value);
                for arg in args {
                    self.walk_expr(arg);
                }
                for (_, value) in kwargs {
                    self.walk_expr(value);
                }
            }
            Expr::Test {
                value, name, args, ..
            } => {
                self.tests.insert(name.clone());
                self.walk_expr(value);
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            Expr::Unary { operand, .. } => self.walk_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => {
                self.walk_expr(test);
                self.walk_expr(then);
                if let Some(other) = otherwise {
                    self.walk_expr(other);
                }
            }
        }
    }

    fn walk_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) {
        if let Expr::Name(fname) = func {
            match fname.as_str() {
                "now" if !self.is_local(fname) => {
                    self.uses_now = true;
                    self.walk_args(args, kwargs);
                    return;
                }
                "lookup" | "query" if !self.is_local(fname) => {
                    self.uses_lookup = true;
                    match args.first() {
                        Some(Expr::Str(target)) => {
                            // The target name is a plugin name, not a
                            // variable reference.
                            self.lookups.push(LookupTarget::Literal(target.clone()));
                        }
                        Some(Expr::Name(var)) => {
                            self.lookups.push(LookupTarget::Variable(var.clone()));
                            if !self.is_local(var) {
                                self.referenced.insert(var.clone());
                            }
                        }
                        Some(other) => self.walk_expr(other),
                        None => {}
                    }
                    for arg in args.iter().skip(1) {
                        self.walk_expr(arg);
                    }
                    for (_, value) in kwargs {
                        self.walk_expr(value);
                    }
                    return;
                }
                _ => {}
            }
        }
        self.walk_expr(func);
        self.walk_args(args, kwargs);
    }

    fn walk_args(&mut self, args: &[Expr], kwargs: &[(String, Expr)]) {
        for arg in args {
            self.walk_expr(arg);
        }
        for (_, value) in kwargs {
            self.walk_expr(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn analyze(src: &str) -> AnalysisResult {
        TemplateAnalyzer::new().parse(src).unwrap()
    }

    fn names(result: &AnalysisResult) -> Vec<String> {
        let mut v: Vec<String> = result.referenced_variables.iter().cloned().collect();
        v.sort();
        v
    }

    #[test]
    fn test_simple_reference() {
        let r = analyze("hello {{ target }}");
        assert_eq!(names(&r), vec!["target"]);
        assert!(!r.is_impure());
    }

    #[test]
    fn test_string_literals_excluded() {
        let r = analyze("{{ 'target' ~ suffix }}");
        assert_eq!(names(&r), vec!["suffix"]);
    }

    #[test]
    fn test_filters_and_tests_collected() {
        let r = analyze("{{ pkg | default('nginx') | upper if pkg is defined }}");
        assert!(r.used_filters.contains("default"));
        assert!(r.used_filters.contains("upper"));
        assert!(r.used_tests.contains("defined"));
        assert_eq!(names(&r), vec!["pkg"]);
        assert!(!r.is_impure());
    }

    #[test]
    fn test_lookup_literal_target() {
        let r = analyze("{{ lookup('file', config_path) }}");
        assert_eq!(
            r.used_lookups,
            vec![LookupTarget::Literal("file".into())]
        );
        // 'file' is a plugin name, config_path a real reference.
        assert_eq!(names(&r), vec!["config_path"]);
        assert!(r.uses_lookup);
        assert!(r.is_impure());
    }

    #[test]
    fn test_lookup_variable_target() {
        let r = analyze("{{ lookup(plugin, 'x') }}");
        assert_eq!(
            r.used_lookups,
            vec![LookupTarget::Variable("plugin".into())]
        );
        assert_eq!(names(&r), vec!["plugin"]);
        assert!(r.is_impure());
    }

    #[test]
    fn test_query_counts_as_lookup() {
        let r = analyze("{{ query('inventory_hostnames', 'all') }}");
        assert!(r.uses_lookup);
        assert_eq!(
            r.used_lookups,
            vec![LookupTarget::Literal("inventory_hostnames".into())]
        );
    }

    #[test]
    fn test_uses_now() {
        let r = analyze("{{ now() }}");
        assert!(r.uses_now);
        assert!(r.is_impure());
        assert!(names(&r).is_empty());
    }

    #[test]
    fn test_random_filter_is_impure() {
        let r = analyze("{{ hosts | random }}");
        assert!(r.is_impure());
    }

    #[test]
    fn test_pure_arithmetic() {
        let r = analyze("{{ (a + b) * 2 | round }}");
        assert_eq!(names(&r), vec!["a", "b"]);
        assert!(!r.is_impure());
    }

    #[test]
    fn test_for_targets_are_bound() {
        let r = analyze("{% for x in xs %}{{ x }}{{ y }}{% endfor %}");
        assert_eq!(names(&r), vec!["xs", "y"]);
    }

    #[test]
    fn test_set_target_is_bound() {
        let r = analyze("{% set x = items | first %}{{ x }}");
        assert_eq!(names(&r), vec!["items"]);
    }

    #[test]
    fn test_loop_target_shadowing_ends_with_loop() {
        let r = analyze("{% for x in xs %}{{ x }}{% endfor %}{{ x }}");
        assert_eq!(names(&r), vec!["x", "xs"]);
    }

    #[test]
    fn test_conditional_bare_identifiers() {
        let r = TemplateAnalyzer::new()
            .parse_conditional("nginx_enabled and ansible_os_family == 'Debian'", &FxHashMap::default())
            .unwrap();
        assert_eq!(names(&r), vec!["ansible_os_family", "nginx_enabled"]);
    }

    #[test]
    fn test_conditional_substitution() {
        let mut mappings = FxHashMap::default();
        mappings.insert("flag".to_string(), "count > 3".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("flag", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["count"]);
    }

    #[test]
    fn test_conditional_substitution_templated_replacement() {
        let mut mappings = FxHashMap::default();
        mappings.insert("flag".to_string(), "{{ count > limit }}".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("flag and other", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["count", "limit", "other"]);
    }

    #[test]
    fn test_conditional_substitution_skips_quoted() {
        let mut mappings = FxHashMap::default();
        mappings.insert("flag".to_string(), "count > 3".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("other == 'flag'", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["other"]);
    }

    #[test]
    fn test_conditional_attribute_name_is_not_substituted() {
        // 'enabled' after the dot is an attribute, not a condition, even
        // when a variable of the same name has a static initializer.
        let mut mappings = FxHashMap::default();
        mappings.insert("enabled".to_string(), "true".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("service.enabled", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["service"]);
    }

    #[test]
    fn test_conditional_comparison_operand_stays_a_reference() {
        // 'count' is a value operand, not a named condition; inlining its
        // initializer would erase the data dependence.
        let mut mappings = FxHashMap::default();
        mappings.insert("count".to_string(), "3".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("count > 1", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["count"]);
    }

    #[test]
    fn test_conditional_negated_named_condition() {
        let mut mappings = FxHashMap::default();
        mappings.insert("flag".to_string(), "count > 3".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("not flag", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["count"]);
    }

    #[test]
    fn test_conditional_unparseable_replacement_stays_a_reference() {
        let mut mappings = FxHashMap::default();
        mappings.insert("flag".to_string(), "{% if x %}".to_string());
        let r = TemplateAnalyzer::new()
            .parse_conditional("flag", &mappings)
            .unwrap();
        assert_eq!(names(&r), vec!["flag"]);
    }

    #[test]
    fn test_syntax_error_propagates() {
        let err = TemplateAnalyzer::new().parse("{{ a | }}").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RolegraphError::TemplateSyntax { .. }
        ));
    }
}
