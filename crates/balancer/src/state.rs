//! Everything guarded by the scheduler lock.

use std::collections::{HashSet, VecDeque};

use raubzug_core::{PeerId, Task};
use raubzug_fabric::StealRequest;

use crate::outstanding::OutstandingJobs;
use crate::queue::WorkQueue;
use crate::victims::VictimTable;

/// How a synchronous steal ended. Written once by whoever resolves the steal
/// and taken exactly once by the waiting requester.
#[derive(Debug)]
pub enum StealOutcome {
    /// The victim answered; `None` means it had no work.
    Reply(Option<Task>),
    /// The victim left or crashed before answering.
    VictimCrashed,
    /// The node is shutting down.
    Exiting,
}

/// Scheduler state shared by worker threads, upcall threads and the steal
/// handler. Only reachable through the lock guard.
pub struct SchedulerState {
    pub victims: VictimTable,
    pub outstanding: OutstandingJobs,
    /// Tasks whose results arrived, waiting to be drained at a safe point.
    pub pending: Vec<Task>,
    pub queue: Box<dyn WorkQueue>,
    /// Target of the synchronous steal in flight, if any.
    pub current_victim: Option<PeerId>,
    pub outcome: Option<StealOutcome>,
    pub exiting: bool,
    /// Peers that left or crashed; messages from them are dropped.
    pub departed: HashSet<PeerId>,
    /// Steal requests waiting for the steal handler thread.
    pub steal_requests: VecDeque<(PeerId, StealRequest)>,
}

impl SchedulerState {
    pub fn new(local: PeerId, queue: Box<dyn WorkQueue>) -> Self {
        Self {
            victims: VictimTable::new(local),
            outstanding: OutstandingJobs::new(),
            pending: Vec::new(),
            queue,
            current_victim: None,
            outcome: None,
            exiting: false,
            departed: HashSet::new(),
            steal_requests: VecDeque::new(),
        }
    }

    /// Put a task back where thieves find it first, flagging it as an orphan
    /// if its owner is gone.
    pub fn requeue(&mut self, mut task: Task) {
        task.clear_stealer();
        if self.departed.contains(task.owner()) {
            task.mark_orphan();
        }
        self.queue.add_to_tail(task);
    }
}
