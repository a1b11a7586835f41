//! Extraction orchestration: scope-aware variable registration and template
//! evaluation against the dependence graph.

pub mod domain;
pub mod infrastructure;

pub use domain::VisibilityInfo;
pub use infrastructure::{TemplateResult, VarContext};
