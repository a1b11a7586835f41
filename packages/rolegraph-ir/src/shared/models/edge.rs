//! Dependence graph edge model
//!
//! Closed set of edge kinds attached as edge data on directed arcs.
//! Legality of a `(source variant, target variant, kind)` combination is
//! enforced by the graph at insertion time, not here.

use serde::{Deserialize, Serialize};

/// Edge payload on a directed arc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Edge {
    /// Sequencing between tasks.
    Order { back: bool, transitive: bool },
    /// Expression reads this variable version.
    Use,
    /// Something produces or binds a variable version / evaluation result.
    Def,
    /// Value bound to a named parameter path on a task.
    Keyword { keyword: String },
}

impl Edge {
    pub fn order() -> Self {
        Edge::Order {
            back: false,
            transitive: false,
        }
    }

    pub fn keyword(keyword: impl Into<String>) -> Self {
        Edge::Keyword {
            keyword: keyword.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::Order { .. } => "ORDER",
            Edge::Use => "USE",
            Edge::Def => "DEF",
            Edge::Keyword { .. } => "KEYWORD",
        }
    }
}
