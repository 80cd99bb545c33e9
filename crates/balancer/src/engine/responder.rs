//! Responder side: hand out work from the local queue.

use std::sync::{Arc, MutexGuard};
use std::time::Instant;

use tracing::{debug, info, warn};

use raubzug_core::{PeerId, RaubzugError, Task};
use raubzug_fabric::{StealReply, StealRequest, WireMessage};

use super::LoadBalancer;
use crate::state::SchedulerState;
use crate::victims::Victim;

type Guard<'a> = MutexGuard<'a, SchedulerState>;

impl LoadBalancer {
    /// Answer a steal request from `requester`.
    ///
    /// Communication faults towards the requester are logged and swallowed;
    /// a task that could not be delivered goes back on the local queue.
    pub fn handle_steal_request(
        &self,
        requester: &PeerId,
        request: StealRequest,
    ) -> Result<(), RaubzugError> {
        self.stats.steal_request();
        debug!(from = %requester, opcode = %request.opcode(), "steal request");

        let state = self.lock();
        if state.departed.contains(requester) {
            warn!(from = %requester, "steal request from departed peer dropped");
            return Ok(());
        }

        let (state, victim) = self.lookup_victim(state, requester);
        let Some(victim) = victim else {
            warn!(from = %requester, "steal request from unreachable peer dropped");
            return Ok(());
        };

        let (state, task) = self.steal_from_local_queue(state, requester, request.blocking);
        let table = if request.wants_table && !self.ft.needs_snapshot() {
            Some(self.ft.snapshot())
        } else {
            None
        };
        drop(state);

        let stamp = task.as_ref().map(|t| t.stamp().clone());
        let reply = WireMessage::StealReply(StealReply {
            synchrony: request.synchrony,
            task,
            table,
        });

        match self.send_message(&victim, &reply) {
            Ok(_) => {
                if let Some(stamp) = stamp {
                    self.stats.stolen_job();
                    info!(to = %requester, stamp = %stamp, "gave away job");
                }
            }
            Err(e) => {
                warn!(to = %requester, error = %e, "could not send steal reply");
                if let Some(stamp) = stamp {
                    let mut state = self.lock();
                    // Gone already if the crash handler redid it.
                    if let Some(task) = state.outstanding.remove(&stamp) {
                        state.requeue(task);
                        self.cond.notify_all();
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand a steal request to the steal handler thread instead of serving
    /// it on the upcall thread.
    pub fn queue_steal_request(&self, requester: PeerId, request: StealRequest) {
        let mut state = self.lock();
        if state.exiting {
            return;
        }
        state.steal_requests.push_back((requester, request));
        self.cond.notify_all();
    }

    pub(super) fn steal_handler_loop(self: Arc<Self>) {
        debug!(node = %self.local, "steal handler started");
        loop {
            let (requester, request) = {
                let mut state = self.lock();
                loop {
                    if state.exiting {
                        debug!(node = %self.local, "steal handler stopped");
                        return;
                    }
                    if let Some(next) = state.steal_requests.pop_front() {
                        break next;
                    }
                    state = self.wait(state);
                }
            };
            if let Err(e) = self.handle_steal_request(&requester, request) {
                warn!(from = %requester, error = %e, "steal request failed");
            }
        }
    }

    /// Take the oldest local task for `requester` and register it as
    /// outstanding. A blocking request waits for work, re-checking the
    /// requester's liveness on every wake.
    fn steal_from_local_queue<'a>(
        &'a self,
        mut state: Guard<'a>,
        requester: &PeerId,
        blocking: bool,
    ) -> (Guard<'a>, Option<Task>) {
        loop {
            if state.departed.contains(requester) {
                return (state, None);
            }
            if let Some(mut task) = state.queue.steal_tail() {
                task.set_stealer(requester.clone());
                state.outstanding.insert(task.clone());
                return (state, Some(task));
            }
            if !blocking || state.exiting {
                return (state, None);
            }
            state = self.wait(state);
        }
    }

    /// Find a peer by identity, giving an asynchronous join time to land.
    ///
    /// Polls until the lookup timeout; a peer still missing then is reported
    /// to the fabric as possibly dead. The lock is released while waiting.
    pub(crate) fn lookup_victim<'a>(
        &'a self,
        mut state: Guard<'a>,
        id: &PeerId,
    ) -> (Guard<'a>, Option<Victim>) {
        let deadline = Instant::now() + self.config.lookup_timeout();
        loop {
            if let Some(victim) = state.victims.get_by_id(id) {
                let victim = victim.clone();
                return (state, Some(victim));
            }
            if state.departed.contains(id) || state.exiting {
                return (state, None);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let pause = self.config.lookup_poll().min(deadline - now);
            state = match self.cond.wait_timeout(state, pause) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }

        warn!(peer = %id, timeout_ms = self.config.lookup_timeout_ms, "peer not found, presumed dead");
        self.fabric.maybe_dead(id);
        (state, None)
    }
}
