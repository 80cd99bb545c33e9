//! Result channel: send a finished stolen task's outcome back to its owner,
//! and match incoming outcomes against the outstanding job registry.
//!
//! Incoming results are never acted on in the upcall. They are parked on the
//! pending list and drained by [`LoadBalancer::handle_delayed_messages`] at
//! the next safe point of a worker thread.

use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use raubzug_core::{PeerId, RaubzugError, Stamp, Task, TaskOutcome};
use raubzug_fabric::{JobResult, WireMessage};

use crate::engine::LoadBalancer;

impl LoadBalancer {
    /// Send the outcome of `task` to its owner.
    ///
    /// No-op if an exception for this task was already sent. The owner is
    /// resolved with the same retrying lookup as steal requesters; if it
    /// stays unreachable the result goes to fault tolerance instead.
    pub fn send_result(&self, task: &mut Task) -> Result<(), RaubzugError> {
        if task.already_sent_exception() {
            debug!(stamp = %task.stamp(), "exception already sent, skipping");
            return Ok(());
        }

        let target = {
            let state = self.lock();
            if self.ft.is_orphan(task) {
                if let Some(owner) = self.ft.lookup_owner(task) {
                    task.set_owner(owner);
                }
                info!(stamp = %task.stamp(), owner = %task.owner(), "storing result of orphan");
                self.ft.store_result(task);
            }
            // An owner whose join has not landed yet gets the lookup grace
            // period before it is presumed crashed.
            let (_state, target) = self.lookup_victim(state, task.owner());
            target
        };

        let Some(target) = target else {
            if !task.is_orphan() {
                info!(stamp = %task.stamp(), owner = %task.owner(), "owner unreachable, job became an orphan");
                let _state = self.lock();
                self.ft.store_result(task);
            }
            return Ok(());
        };

        let stamp = task.stamp().clone();
        let result = match task.outcome() {
            Some(TaskOutcome::Value(value)) => JobResult::Normal {
                stamp,
                value: value.clone(),
            },
            Some(TaskOutcome::Exception(exception)) => JobResult::Exception {
                exception: exception.clone(),
                stamp,
            },
            None => return Err(RaubzugError::MissingOutcome(stamp)),
        };
        let is_exception = matches!(result, JobResult::Exception { .. });

        match self.send_message(&target, &WireMessage::JobResult(result)) {
            Ok(bytes) => {
                self.stats.result_sent(bytes);
                if is_exception {
                    task.mark_exception_sent();
                }
                debug!(stamp = %task.stamp(), to = %target.id(), bytes, "sent job result");
            }
            Err(e) => {
                warn!(stamp = %task.stamp(), to = %target.id(), error = %e, "could not send job result");
            }
        }
        Ok(())
    }

    /// Upcall entry for an incoming job result.
    pub fn handle_job_result(&self, sender: &PeerId, result: JobResult) -> Result<(), RaubzugError> {
        let (stamp, outcome) = match result {
            JobResult::Normal { stamp, value } => (stamp, TaskOutcome::Value(value)),
            JobResult::Exception { exception, stamp } => {
                info!(from = %sender, stamp = %stamp, exception = %exception, "exception result");
                (stamp, TaskOutcome::Exception(exception))
            }
        };
        debug!(from = %sender, stamp = %stamp, "job result");
        self.add_job_result(outcome, &stamp);
        Ok(())
    }

    /// Match an outcome with its outstanding task and park it for draining.
    /// Returns false if nothing was outstanding under `stamp` (a duplicate,
    /// or a result for a job already resolved elsewhere).
    pub fn add_job_result(&self, outcome: TaskOutcome, stamp: &Stamp) -> bool {
        let mut state = self.lock();
        self.received_results.store(true, Ordering::SeqCst);

        let Some(mut task) = state.outstanding.remove(stamp) else {
            debug!(stamp = %stamp, "result for unknown or resolved job dropped");
            self.stats.result_dropped();
            return false;
        };
        task.set_outcome(outcome);
        state.pending.push(task);
        self.stats.result_received();
        true
    }

    /// Drain the pending list: exceptions go to abort handling, values
    /// release their continuation. Call only from a worker safe point.
    pub fn handle_delayed_messages(&self) {
        if !self.received_results.load(Ordering::SeqCst) {
            return;
        }
        let drained = {
            let mut state = self.lock();
            self.received_results.store(false, Ordering::SeqCst);
            std::mem::take(&mut state.pending)
        };
        for task in drained {
            self.complete(task);
        }
    }

    /// Finish a task this node owns and executed itself.
    pub fn complete_locally(&self, task: Task) {
        self.complete(task);
    }

    fn complete(&self, task: Task) {
        if task.exception().is_some() {
            self.completion.handle_exception(task);
        } else {
            self.completion.job_finished(task);
        }
    }

    /// Results waiting to be drained.
    pub fn pending_results(&self) -> usize {
        self.lock().pending.len()
    }
}
