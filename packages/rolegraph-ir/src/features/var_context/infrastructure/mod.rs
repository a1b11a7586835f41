pub mod cache;
pub mod context;

pub use cache::{CacheKey, CacheStack};
pub use context::{TemplateResult, VarContext};
