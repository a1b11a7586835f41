/*
 * Environment Stack
 *
 * LIFO stack of variable-binding frames, one per lexical/structural scope of
 * the analyzed script. Each frame is tagged with a scope kind; the kind's
 * rank in the precedence table decides which of several visible bindings for
 * the same name wins. Precedence ties break to the most recently set record
 * across all frames.
 *
 * Resolution is computed fresh on every query: pushing or popping a frame
 * changes visibility immediately, and sequential sibling frames never see
 * each other's bindings.
 */

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{Result, RolegraphError};
use crate::shared::models::{PrecedenceTable, ScopeKind};

/// Static initializer of a variable binding.
///
/// `None` means the variable was introduced without a static value (a
/// registered-result placeholder); it is distinct from an empty-string
/// initializer and masks lower-precedence initialisers for the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    Static(String),
    None,
}

impl Initializer {
    pub fn is_none(&self) -> bool {
        matches!(self, Initializer::None)
    }
}

/// One recorded variable definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    pub version: u32,
    pub initializer: Initializer,
    pub scope_kind: ScopeKind,
}

/// Opaque handle for a pushed frame, used to assert matched exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Frame {
    kind: ScopeKind,
    /// name -> (record, insertion sequence number)
    bindings: FxHashMap<String, (VariableRecord, u64)>,
}

/// Stack of variable-binding scopes with precedence-aware resolution.
#[derive(Debug)]
pub struct EnvironmentStack {
    frames: Vec<Frame>,
    table: PrecedenceTable,
    /// Global insertion counter; most recent wins on precedence ties.
    seq: u64,
}

impl EnvironmentStack {
    pub fn new(table: PrecedenceTable) -> Self {
        Self {
            frames: Vec::new(),
            table,
            seq: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_kind(&self) -> Option<ScopeKind> {
        self.frames.last().map(|f| f.kind)
    }

    /// Push a new empty frame tagged with `kind`.
    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        trace!(kind = kind.as_str(), depth = self.frames.len(), "enter scope");
        self.frames.push(Frame {
            kind,
            bindings: FxHashMap::default(),
        });
        ScopeId(self.frames.len())
    }

    /// Pop the top frame, discarding its bindings. Shadowed names in
    /// enclosing frames become visible again.
    pub fn exit_scope(&mut self) -> Result<()> {
        match self.frames.pop() {
            Some(frame) => {
                trace!(kind = frame.kind.as_str(), depth = self.frames.len(), "exit scope");
                Ok(())
            }
            None => Err(RolegraphError::scope_underflow(
                "exit_scope without matching enter_scope",
            )),
        }
    }

    /// Record in the current top frame that `name` resolves to `record`,
    /// overwriting any prior record for `name` in the same frame.
    pub fn set_variable_definition(&mut self, record: VariableRecord) -> Result<()> {
        let seq = self.seq;
        self.seq += 1;
        let frame = self.frames.last_mut().ok_or_else(|| {
            RolegraphError::scope_underflow("set_variable_definition with no active scope")
        })?;
        frame.bindings.insert(record.name.clone(), (record, seq));
        Ok(())
    }

    /// The winning record for each visible name, freshly resolved.
    fn resolve(&self) -> FxHashMap<&str, &(VariableRecord, u64)> {
        let mut winners: FxHashMap<&str, &(VariableRecord, u64)> = FxHashMap::default();
        for frame in &self.frames {
            for (name, entry) in &frame.bindings {
                let rank = self.table.rank(entry.0.scope_kind);
                let wins = match winners.get(name.as_str()) {
                    None => true,
                    Some(current) => {
                        let current_rank = self.table.rank(current.0.scope_kind);
                        // Higher precedence wins; on a tie, most recent.
                        rank > current_rank || (rank == current_rank && entry.1 > current.1)
                    }
                };
                if wins {
                    winners.insert(name.as_str(), entry);
                }
            }
        }
        winners
    }

    /// Static initialisers for all names eagerly resolvable right now.
    ///
    /// A name whose winning record has no initializer is excluded even when
    /// a lower-precedence record for the same name has one: the
    /// no-initializer status strictly masks weaker layers.
    pub fn get_variable_initialisers(&self) -> FxHashMap<String, String> {
        self.resolve()
            .into_iter()
            .filter_map(|(name, (record, _))| match &record.initializer {
                Initializer::Static(init) => Some((name.to_string(), init.clone())),
                Initializer::None => None,
            })
            .collect()
    }

    /// All currently visible `(name, version)` pairs. No-initializer
    /// bindings stay visible; they are just not eagerly resolvable.
    pub fn get_currently_visible_definitions(&self) -> FxHashMap<String, u32> {
        self.resolve()
            .into_iter()
            .map(|(name, (record, _))| (name.to_string(), record.version))
            .collect()
    }

    /// The winning record for one name, if visible.
    pub fn lookup(&self, name: &str) -> Option<VariableRecord> {
        self.resolve().get(name).map(|(record, _)| record.clone())
    }
}

impl Default for EnvironmentStack {
    fn default() -> Self {
        Self::new(PrecedenceTable::default())
    }
}
