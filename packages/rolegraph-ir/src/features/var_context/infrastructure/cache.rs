//! Expression cache stack
//!
//! One cache layer per active cached scope. Entries key on the normalized
//! expression text plus the snapshot of variable versions it depends on;
//! lookups search innermost-outward, insertions always target the innermost
//! layer, and a layer is discarded wholesale when its scope exits.

use petgraph::graph::NodeIndex;
use rustc_hash::FxHashMap;
use tracing::debug;

/// `(normalized text, sorted (name, version, value_version) snapshot)`.
pub type CacheKey = (String, Vec<(String, u32, u32)>);

#[derive(Debug, Default)]
struct CacheLayer {
    entries: FxHashMap<CacheKey, (NodeIndex, NodeIndex)>,
}

#[derive(Debug, Default)]
pub struct CacheStack {
    layers: Vec<CacheLayer>,
}

impl CacheStack {
    pub fn is_active(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn push_layer(&mut self) {
        self.layers.push(CacheLayer::default());
    }

    pub fn pop_layer(&mut self) {
        if let Some(layer) = self.layers.pop() {
            debug!(entries = layer.entries.len(), "discarding cache layer");
        }
    }

    /// Search the stack innermost-outward for a previously created
    /// `(Expression, IntermediateValue)` pair.
    pub fn lookup(&self, key: &CacheKey) -> Option<(NodeIndex, NodeIndex)> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key).copied())
    }

    /// Record a pair in the innermost layer; no-op without an active layer.
    pub fn insert(&mut self, key: CacheKey, pair: (NodeIndex, NodeIndex)) {
        if let Some(layer) = self.layers.last_mut() {
            layer.entries.insert(key, pair);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> CacheKey {
        (text.to_string(), vec![("x".to_string(), 0, 0)])
    }

    #[test]
    fn test_insert_without_layer_is_noop() {
        let mut stack = CacheStack::default();
        stack.insert(key("{{ x }}"), (NodeIndex::new(0), NodeIndex::new(1)));
        assert!(!stack.is_active());
        assert!(stack.lookup(&key("{{ x }}")).is_none());
    }

    #[test]
    fn test_lookup_searches_outward() {
        let mut stack = CacheStack::default();
        stack.push_layer();
        stack.insert(key("{{ x }}"), (NodeIndex::new(0), NodeIndex::new(1)));
        stack.push_layer();
        // Entry in the enclosing layer is found from the nested layer.
        assert_eq!(
            stack.lookup(&key("{{ x }}")),
            Some((NodeIndex::new(0), NodeIndex::new(1)))
        );
    }

    #[test]
    fn test_pop_discards_layer_entries() {
        let mut stack = CacheStack::default();
        stack.push_layer();
        stack.push_layer();
        stack.insert(key("{{ x }}"), (NodeIndex::new(0), NodeIndex::new(1)));
        stack.pop_layer();
        assert!(stack.is_active());
        assert!(stack.lookup(&key("{{ x }}")).is_none());
    }

    #[test]
    fn test_inner_entry_shadows_outer() {
        let mut stack = CacheStack::default();
        stack.push_layer();
        stack.insert(key("{{ x }}"), (NodeIndex::new(0), NodeIndex::new(1)));
        stack.push_layer();
        stack.insert(key("{{ x }}"), (NodeIndex::new(2), NodeIndex::new(3)));
        assert_eq!(
            stack.lookup(&key("{{ x }}")),
            Some((NodeIndex::new(2), NodeIndex::new(3)))
        );
        stack.pop_layer();
        assert_eq!(
            stack.lookup(&key("{{ x }}")),
            Some((NodeIndex::new(0), NodeIndex::new(1)))
        );
    }
}
