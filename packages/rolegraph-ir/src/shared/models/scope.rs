//! Scope kinds and variable precedence
//!
//! Each variable-binding frame carries a `ScopeKind`; the kind decides which
//! of several simultaneously visible bindings for the same name wins. The
//! ordering follows the documented variable-precedence layers of the target
//! ecosystem and is injectable as configuration rather than hard-coded in
//! the resolution logic.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Variable-binding scope kind, one per precedence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    RoleDefaults,
    InventoryGroupVars,
    InventoryHostVars,
    HostFacts,
    PlayVars,
    PlayVarsPrompt,
    PlayVarsFiles,
    RoleVars,
    BlockVars,
    TaskVars,
    IncludeVars,
    SetFactsRegistered,
    IncludeParams,
    ExtraVars,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::RoleDefaults => "role_defaults",
            ScopeKind::InventoryGroupVars => "inventory_group_vars",
            ScopeKind::InventoryHostVars => "inventory_host_vars",
            ScopeKind::HostFacts => "host_facts",
            ScopeKind::PlayVars => "play_vars",
            ScopeKind::PlayVarsPrompt => "play_vars_prompt",
            ScopeKind::PlayVarsFiles => "play_vars_files",
            ScopeKind::RoleVars => "role_vars",
            ScopeKind::BlockVars => "block_vars",
            ScopeKind::TaskVars => "task_vars",
            ScopeKind::IncludeVars => "include_vars",
            ScopeKind::SetFactsRegistered => "set_facts_registered",
            ScopeKind::IncludeParams => "include_params",
            ScopeKind::ExtraVars => "extra_vars",
        }
    }
}

/// Documented precedence order, lowest to highest.
pub const DEFAULT_PRECEDENCE_ORDER: [ScopeKind; 14] = [
    ScopeKind::RoleDefaults,
    ScopeKind::InventoryGroupVars,
    ScopeKind::InventoryHostVars,
    ScopeKind::HostFacts,
    ScopeKind::PlayVars,
    ScopeKind::PlayVarsPrompt,
    ScopeKind::PlayVarsFiles,
    ScopeKind::RoleVars,
    ScopeKind::BlockVars,
    ScopeKind::TaskVars,
    ScopeKind::IncludeVars,
    ScopeKind::SetFactsRegistered,
    ScopeKind::IncludeParams,
    ScopeKind::ExtraVars,
];

/// Injectable precedence table mapping scope kinds to ranks.
///
/// Higher rank wins. `Default` reproduces [`DEFAULT_PRECEDENCE_ORDER`];
/// callers analyzing a dialect with different layering can construct their
/// own order via [`PrecedenceTable::from_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedenceTable {
    ranks: FxHashMap<ScopeKind, u32>,
}

impl PrecedenceTable {
    /// Build a table from an explicit lowest-to-highest ordering.
    pub fn from_order(order: &[ScopeKind]) -> Self {
        let ranks = order
            .iter()
            .enumerate()
            .map(|(i, kind)| (*kind, i as u32))
            .collect();
        Self { ranks }
    }

    /// Rank of a scope kind; kinds absent from the table rank lowest.
    pub fn rank(&self, kind: ScopeKind) -> u32 {
        self.ranks.get(&kind).copied().unwrap_or(0)
    }
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        Self::from_order(&DEFAULT_PRECEDENCE_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let table = PrecedenceTable::default();
        assert!(table.rank(ScopeKind::TaskVars) > table.rank(ScopeKind::PlayVars));
        assert!(table.rank(ScopeKind::SetFactsRegistered) > table.rank(ScopeKind::TaskVars));
        assert!(table.rank(ScopeKind::ExtraVars) > table.rank(ScopeKind::SetFactsRegistered));
        assert_eq!(table.rank(ScopeKind::RoleDefaults), 0);
    }

    #[test]
    fn test_prompt_below_vars_files() {
        // Documented ecosystem table: vars_prompt sits below vars_files.
        let table = PrecedenceTable::default();
        assert!(table.rank(ScopeKind::PlayVarsFiles) > table.rank(ScopeKind::PlayVarsPrompt));
    }

    #[test]
    fn test_injected_order() {
        let table = PrecedenceTable::from_order(&[ScopeKind::TaskVars, ScopeKind::PlayVars]);
        assert!(table.rank(ScopeKind::PlayVars) > table.rank(ScopeKind::TaskVars));
    }

    #[test]
    fn test_serde_round_trip() {
        let table = PrecedenceTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let back: PrecedenceTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rank(ScopeKind::ExtraVars), table.rank(ScopeKind::ExtraVars));
    }
}
