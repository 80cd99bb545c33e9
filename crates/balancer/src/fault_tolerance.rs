//! Hooks into the fault-tolerance subsystem.
//!
//! The scheduler only calls these at four points: deciding whether a steal
//! request asks for a table, attaching a table to a reply, applying a
//! received table, and handing over the result of an orphaned task.
//! Implementations are called with the scheduler lock held and must not
//! call back into the load balancer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use raubzug_core::{PeerId, ResultTable, Stamp, TableEntry, Task};

pub trait FaultTolerance: Send + Sync {
    /// The task's owner has crashed.
    fn is_orphan(&self, task: &Task) -> bool {
        task.is_orphan()
    }

    /// The node now responsible for the result of `task`, if known.
    fn lookup_owner(&self, task: &Task) -> Option<PeerId>;

    /// Keep the result of a task whose owner could not be reached.
    fn store_result(&self, task: &Task);

    /// Our own table is incomplete and must be fetched from a peer.
    fn needs_snapshot(&self) -> bool;

    fn snapshot(&self) -> ResultTable;

    fn apply_snapshot(&self, table: ResultTable);
}

/// Fault tolerance disabled: results for unreachable owners are dropped.
#[derive(Debug, Default)]
pub struct NoFaultTolerance;

impl FaultTolerance for NoFaultTolerance {
    fn lookup_owner(&self, _task: &Task) -> Option<PeerId> {
        None
    }

    fn store_result(&self, task: &Task) {
        debug!(stamp = %task.stamp(), "no fault tolerance, dropping result of orphan");
    }

    fn needs_snapshot(&self) -> bool {
        false
    }

    fn snapshot(&self) -> ResultTable {
        ResultTable::new()
    }

    fn apply_snapshot(&self, _table: ResultTable) {}
}

/// In-memory result table, exchanged with peers on steal replies.
#[derive(Debug, Default)]
pub struct ReplicatedTable {
    table: Mutex<ResultTable>,
    awaiting_snapshot: AtomicBool,
}

impl ReplicatedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table for a node that just joined and has to fetch the contents
    /// from a peer before serving its own.
    pub fn awaiting_snapshot() -> Self {
        Self {
            table: Mutex::new(ResultTable::new()),
            awaiting_snapshot: AtomicBool::new(true),
        }
    }

    /// Record which node owns `stamp`, e.g. after a re-election.
    pub fn set_owner(&self, stamp: Stamp, owner: PeerId) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = table.get(&stamp).and_then(|e| e.outcome.clone());
        table.insert(stamp, TableEntry { owner, outcome });
    }

    pub fn entry(&self, stamp: &Stamp) -> Option<TableEntry> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.get(stamp).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FaultTolerance for ReplicatedTable {
    fn lookup_owner(&self, task: &Task) -> Option<PeerId> {
        self.entry(task.stamp()).map(|e| e.owner)
    }

    fn store_result(&self, task: &Task) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.insert(
            task.stamp().clone(),
            TableEntry {
                owner: task.owner().clone(),
                outcome: task.outcome().cloned(),
            },
        );
        debug!(stamp = %task.stamp(), entries = table.len(), "stored result");
    }

    fn needs_snapshot(&self) -> bool {
        self.awaiting_snapshot.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> ResultTable {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn apply_snapshot(&self, incoming: ResultTable) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.merge(incoming);
        self.awaiting_snapshot.store(false, Ordering::SeqCst);
        debug!(entries = table.len(), "applied result table snapshot");
    }
}
