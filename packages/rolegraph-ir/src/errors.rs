//! Error types for rolegraph-ir
//!
//! Provides unified error handling across the crate.

use thiserror::Error;

/// Main error type for rolegraph-ir operations
#[derive(Debug, Error)]
pub enum RolegraphError {
    /// Malformed template text. Not recoverable locally: dependency
    /// resolution cannot proceed without a parse, so this aborts extraction
    /// of the current unit.
    #[error("Template syntax error at {line}:{column}: {message}")]
    TemplateSyntax {
        message: String,
        line: u32,
        column: u32,
    },

    /// Illegal node/edge combination handed to the dependence graph.
    /// Always a contract violation in the caller, never user-data-dependent.
    #[error("Graph type error: {0}")]
    GraphType(String),

    /// Scope stack misuse (exit without matching enter, or definition with
    /// no active scope).
    #[error("Scope underflow: {0}")]
    ScopeUnderflow(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RolegraphError {
    /// Create a template syntax error
    pub fn template_syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        RolegraphError::TemplateSyntax {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create a graph type error
    pub fn graph_type(msg: impl Into<String>) -> Self {
        RolegraphError::GraphType(msg.into())
    }

    /// Create a scope underflow error
    pub fn scope_underflow(msg: impl Into<String>) -> Self {
        RolegraphError::ScopeUnderflow(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RolegraphError::Config(msg.into())
    }
}

/// Result type alias for rolegraph operations
pub type Result<T> = std::result::Result<T, RolegraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RolegraphError::template_syntax("unexpected '}'", 3, 14);
        assert_eq!(
            err.to_string(),
            "Template syntax error at 3:14: unexpected '}'"
        );

        let err = RolegraphError::graph_type("Literal -> Task with USE edge");
        assert!(err.to_string().starts_with("Graph type error"));
    }
}
