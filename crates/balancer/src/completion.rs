use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use raubzug_core::{Stamp, Task, TaskOutcome};

/// Receives tasks whose results have come back (or were computed locally),
/// at a safe point in a worker thread.
pub trait Completion: Send + Sync {
    fn job_finished(&self, task: Task);

    /// Abort handling for a task that raised an exception.
    fn handle_exception(&self, task: Task);
}

/// Collects outcomes by stamp and lets callers wait for a count.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<HashMap<Stamp, TaskOutcome>>,
    finished: Condvar,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, task: Task) {
        let Some(outcome) = task.outcome().cloned() else {
            return;
        };
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        results.insert(task.stamp().clone(), outcome);
        self.finished.notify_all();
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, stamp: &Stamp) -> Option<TaskOutcome> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(stamp)
            .cloned()
    }

    pub fn exceptions(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|o| matches!(o, TaskOutcome::Exception(_)))
            .count()
    }

    /// Block until at least `count` results are in. Returns false on timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        while results.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            results = match self.finished.wait_timeout(results, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

impl Completion for ResultCollector {
    fn job_finished(&self, task: Task) {
        self.record(task);
    }

    fn handle_exception(&self, task: Task) {
        if let Some(e) = task.exception() {
            info!(stamp = %task.stamp(), exception = %e, "task raised an exception");
        }
        self.record(task);
    }
}
