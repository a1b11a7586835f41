//! Visibility side-table
//!
//! Maps each `(name, version)` pair to the set of locations from which it
//! was visible while extraction proceeded. Handed to the rule engine next to
//! the finished graph; the exact shape is an external contract, only
//! deterministic iteration is guaranteed here.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::shared::models::NodeLocation;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VisibilityInfo {
    entries: BTreeMap<(String, u32), BTreeSet<NodeLocation>>,
}

impl VisibilityInfo {
    pub fn record(&mut self, name: &str, version: u32, location: NodeLocation) {
        self.entries
            .entry((name.to_string(), version))
            .or_default()
            .insert(location);
    }

    pub fn locations(&self, name: &str, version: u32) -> Option<&BTreeSet<NodeLocation>> {
        self.entries.get(&(name.to_string(), version))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deterministic iteration: sorted by `(name, version)`.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&(String, u32), &BTreeSet<NodeLocation>)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut info = VisibilityInfo::default();
        info.record("pkg", 0, NodeLocation::new("main.yml", 3, 0));
        info.record("pkg", 0, NodeLocation::new("main.yml", 7, 0));
        info.record("pkg", 0, NodeLocation::new("main.yml", 3, 0));

        assert_eq!(info.locations("pkg", 0).unwrap().len(), 2);
        assert!(info.locations("pkg", 1).is_none());
        assert_eq!(info.iter().count(), 1);
    }
}
