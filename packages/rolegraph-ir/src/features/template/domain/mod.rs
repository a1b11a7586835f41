pub mod ast;

pub use ast::{BinOp, Expr, Template, TemplateNode, UnaryOp};
