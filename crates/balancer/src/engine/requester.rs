//! Requester side: ask a victim for work and wait for the answer.

use std::sync::TryLockError;

use tracing::{debug, info, warn};

use raubzug_core::config::WaitMode;
use raubzug_core::{PeerId, RaubzugError, Task};
use raubzug_fabric::{StealReply, StealRequest, Synchrony, WireMessage};

use super::LoadBalancer;
use crate::state::StealOutcome;

impl LoadBalancer {
    /// Synchronously steal one task from `victim`.
    ///
    /// Returns `None` when the victim had no work, when it left or crashed
    /// before answering, when the node is exiting, or when another worker
    /// of this node already has a synchronous steal in flight.
    /// With `block_on_responder` the victim holds the request until it has
    /// work.
    pub fn steal(&self, victim: &PeerId, block_on_responder: bool) -> Option<Task> {
        let _slot = match self.steal_slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };

        let (target, request) = {
            let mut state = self.lock();
            if state.exiting {
                return None;
            }
            let target = state.victims.get_by_id(victim)?.clone();
            // Decided under the lock so a concurrent snapshot cannot slip in
            // between the check and the send.
            let request =
                StealRequest::new(Synchrony::Sync, block_on_responder, self.ft.needs_snapshot());
            state.current_victim = Some(victim.clone());
            state.outcome = None;
            (target, request)
        };

        self.stats.steal_attempt();
        if let Err(e) = self.send_message(&target, &WireMessage::StealRequest(request)) {
            debug!(victim = %victim, error = %e, "steal request not delivered");
            let mut state = self.lock();
            state.current_victim = None;
            state.outcome = None;
            return None;
        }

        match self.wait_for_steal_reply() {
            StealOutcome::Reply(Some(task)) => {
                self.stats.steal_success();
                info!(victim = %victim, stamp = %task.stamp(), "stole job");
                Some(task)
            }
            StealOutcome::Reply(None) => None,
            StealOutcome::VictimCrashed => {
                debug!(victim = %victim, "victim departed during steal");
                None
            }
            StealOutcome::Exiting => None,
        }
    }

    /// Fire off an asynchronous steal request; the reply is handed to the
    /// steal algorithm when it arrives.
    pub fn send_async_steal_request(&self, victim: &PeerId) -> Result<(), RaubzugError> {
        let (target, request) = {
            let state = self.lock();
            if state.exiting {
                return Err(RaubzugError::Exiting);
            }
            let target = state
                .victims
                .get_by_id(victim)
                .cloned()
                .ok_or_else(|| RaubzugError::Disconnected(victim.clone()))?;
            let request = StealRequest::new(Synchrony::Async, false, self.ft.needs_snapshot());
            (target, request)
        };

        self.stats.async_steal_attempt();
        self.send_message(&target, &WireMessage::StealRequest(request))?;
        Ok(())
    }

    /// Block until the steal in flight is resolved. Every outcome is taken
    /// exactly once.
    fn wait_for_steal_reply(&self) -> StealOutcome {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                state.current_victim = None;
                return outcome;
            }
            if state.exiting {
                state.current_victim = None;
                return StealOutcome::Exiting;
            }
            match self.config.wait_mode {
                WaitMode::Upcall => state = self.wait(state),
                WaitMode::Poll => {
                    drop(state);
                    self.handle_delayed_messages();
                    std::thread::yield_now();
                    state = self.lock();
                }
            }
        }
    }

    /// Deliver the answer to the synchronous steal in flight.
    ///
    /// A reply from a live peer that is not the current victim is a
    /// protocol violation, except while exiting, when the task (if any) goes
    /// back on the queue.
    pub fn got_steal_reply(&self, sender: &PeerId, task: Option<Task>) -> Result<(), RaubzugError> {
        let mut state = self.lock();
        let expected = state.current_victim.as_ref() == Some(sender) && state.outcome.is_none();
        if !expected {
            if state.exiting {
                if let Some(task) = task {
                    state.requeue(task);
                }
                return Ok(());
            }
            return Err(RaubzugError::UnmatchedReply {
                from: sender.clone(),
            });
        }
        state.outcome = Some(StealOutcome::Reply(task));
        self.cond.notify_all();
        Ok(())
    }

    /// Entry point for every steal reply arriving on the wire.
    pub fn handle_reply(&self, sender: &PeerId, reply: StealReply) -> Result<(), RaubzugError> {
        let opcode = reply.opcode();
        let StealReply { task, table, .. } = reply;
        debug!(from = %sender, %opcode, "steal reply");

        {
            let mut state = self.lock();
            if let Some(table) = table {
                self.ft.apply_snapshot(table);
            }
            if state.departed.contains(sender) {
                warn!(from = %sender, %opcode, "steal reply from departed peer ignored");
                if let Some(task) = task {
                    state.requeue(task);
                    self.cond.notify_all();
                }
                return Ok(());
            }
        }

        self.algorithm.steal_reply_handler(self, sender, task, opcode)
    }
}
