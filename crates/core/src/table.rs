use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{PeerId, Stamp};
use crate::task::TaskOutcome;

/// One entry of the replicated result table kept by fault tolerance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableEntry {
    /// Node that currently owns (is waiting for) the task.
    pub owner: PeerId,
    /// Result, once one has been stored.
    pub outcome: Option<TaskOutcome>,
}

/// Snapshot of the fault-tolerance result table, piggy-backed on steal
/// replies to nodes that asked for one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultTable {
    entries: BTreeMap<Stamp, TableEntry>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stamp: Stamp, entry: TableEntry) -> Option<TableEntry> {
        self.entries.insert(stamp, entry)
    }

    pub fn get(&self, stamp: &Stamp) -> Option<&TableEntry> {
        self.entries.get(stamp)
    }

    pub fn remove(&mut self, stamp: &Stamp) -> Option<TableEntry> {
        self.entries.remove(stamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self`; entries from `other` win.
    pub fn merge(&mut self, other: ResultTable) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stamp, &TableEntry)> {
        self.entries.iter()
    }
}
