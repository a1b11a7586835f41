//! Template expression analysis: lexing, parsing and structural analysis of
//! templated strings.

pub mod domain;
pub mod infrastructure;

pub use domain::{Expr, Template, TemplateNode};
pub use infrastructure::{AnalysisResult, LookupTarget, TemplateAnalyzer, TemplateParser};
