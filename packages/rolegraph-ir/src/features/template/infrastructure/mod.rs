pub mod analyzer;
pub mod lexer;
pub mod parser;

pub use analyzer::{AnalysisResult, LookupTarget, TemplateAnalyzer};
pub use parser::TemplateParser;
