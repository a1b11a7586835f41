//! Template AST
//!
//! Structural parse tree of one templated string. The tree is analyzed, not
//! evaluated: downstream consumers only care which names, filters, tests and
//! lookups an expression touches.

use serde::{Deserialize, Serialize};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// Expression tree inside `{{ }}` / `{% %}` delimiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// Free or locally bound name.
    Name(String),
    Attr {
        base: Box<Expr>,
        attr: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// Pipeline filter application: `value | name(args)`.
    Filter {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// Boolean test application: `value is [not] name(args)`.
    Test {
        value: Box<Expr>,
        name: String,
        negated: bool,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Inline conditional: `a if cond else b`.
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

/// One segment of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateNode {
    /// Raw text between delimiters.
    Text(String),
    /// `{{ expr }}` output substitution.
    Output(Expr),
    /// `{% if %}` chain; each branch is (condition, body).
    If {
        branches: Vec<(Expr, Vec<TemplateNode>)>,
        else_body: Option<Vec<TemplateNode>>,
    },
    /// `{% for targets in iter %}` loop; targets are bound inside the body.
    For {
        targets: Vec<String>,
        iter: Expr,
        body: Vec<TemplateNode>,
    },
    /// `{% set target = expr %}` local binding.
    Set { target: String, value: Expr },
}

/// Parsed template: the root of the analyzer's AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub nodes: Vec<TemplateNode>,
}

impl Template {
    /// Whether the template is a single bare `{{ expr }}` with no
    /// surrounding text.
    pub fn single_output(&self) -> Option<&Expr> {
        match self.nodes.as_slice() {
            [TemplateNode::Output(expr)] => Some(expr),
            _ => None,
        }
    }
}
