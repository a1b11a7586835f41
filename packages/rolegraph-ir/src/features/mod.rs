//! Feature modules, one directory per concern with `domain` and
//! `infrastructure` layers.

pub mod dep_graph;
pub mod environment;
pub mod export;
pub mod template;
pub mod var_context;
