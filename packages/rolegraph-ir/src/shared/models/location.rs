//! Source location types
//!
//! Positions in the analyzed script sources. Included files carry an
//! includer chain recording how the file was reached.

use serde::{Deserialize, Serialize};

/// Single location in source code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

/// Location attached to a graph node.
///
/// `includer` chains back through the include directives that pulled the
/// containing file into the unit, outermost last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub includer: Option<Box<NodeLocation>>,
}

impl NodeLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            includer: None,
        }
    }

    /// Attach the location of the include directive that reached this file.
    pub fn included_from(mut self, includer: NodeLocation) -> Self {
        self.includer = Some(Box::new(includer));
        self
    }

    /// Depth of the include chain (0 for a directly analyzed file).
    pub fn include_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.includer.as_deref();
        while let Some(loc) = cursor {
            depth += 1;
            cursor = loc.includer.as_deref();
        }
        depth
    }
}
