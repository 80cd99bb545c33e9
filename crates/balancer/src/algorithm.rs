//! Pluggable steal algorithms: which peer an idle worker asks for work, and
//! what happens with the reply.

use std::sync::Mutex;

use tracing::debug;

use raubzug_core::{PeerId, RaubzugError, Task};
use raubzug_fabric::Opcode;

use crate::engine::LoadBalancer;

pub trait StealAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt by an idle worker to obtain work from a peer.
    fn client_iteration(&self, lb: &LoadBalancer) -> Option<Task>;

    /// Called for every steal reply from a live peer. The default forwards
    /// to the synchronous steal in flight.
    fn steal_reply_handler(
        &self,
        lb: &LoadBalancer,
        sender: &PeerId,
        task: Option<Task>,
        opcode: Opcode,
    ) -> Result<(), RaubzugError> {
        let _ = opcode;
        lb.got_steal_reply(sender, task)
    }

    fn victim_departed(&self, _lb: &LoadBalancer, _peer: &PeerId) {}

    fn exit(&self, _lb: &LoadBalancer) {}
}

/// Synchronous steal from a uniformly random peer.
#[derive(Debug, Default)]
pub struct RandomStealing;

impl StealAlgorithm for RandomStealing {
    fn name(&self) -> &'static str {
        "random"
    }

    fn client_iteration(&self, lb: &LoadBalancer) -> Option<Task> {
        let victim = lb.random_victim()?;
        lb.steal(&victim, false)
    }
}

/// Keeps one asynchronous steal to another locality domain in flight while
/// stealing synchronously inside its own domain, hiding wide-area latency.
#[derive(Debug, Default)]
pub struct ClusterAwareRandomStealing {
    /// Target of the outstanding cross-domain request.
    async_victim: Mutex<Option<PeerId>>,
}

impl ClusterAwareRandomStealing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn async_in_flight(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<PeerId>> {
        self.async_victim.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StealAlgorithm for ClusterAwareRandomStealing {
    fn name(&self) -> &'static str {
        "cluster-aware"
    }

    fn client_iteration(&self, lb: &LoadBalancer) -> Option<Task> {
        {
            let mut slot = self.slot();
            if slot.is_none() {
                if let Some(remote) = lb.random_remote_victim() {
                    match lb.send_async_steal_request(&remote) {
                        Ok(()) => *slot = Some(remote),
                        Err(e) => debug!(victim = %remote, error = %e, "async steal request failed"),
                    }
                }
            }
        }

        let local = lb.random_local_victim()?;
        lb.steal(&local, false)
    }

    fn steal_reply_handler(
        &self,
        lb: &LoadBalancer,
        sender: &PeerId,
        task: Option<Task>,
        opcode: Opcode,
    ) -> Result<(), RaubzugError> {
        if !opcode.is_async() {
            return lb.got_steal_reply(sender, task);
        }

        let mut slot = self.slot();
        if slot.as_ref() == Some(sender) {
            *slot = None;
        }
        drop(slot);

        if let Some(task) = task {
            debug!(from = %sender, stamp = %task.stamp(), "async steal succeeded");
            lb.add_to_queue_tail(task);
        }
        Ok(())
    }

    fn victim_departed(&self, _lb: &LoadBalancer, peer: &PeerId) {
        let mut slot = self.slot();
        if slot.as_ref() == Some(peer) {
            debug!(peer = %peer, "async victim departed");
            *slot = None;
        }
    }

    fn exit(&self, _lb: &LoadBalancer) {
        *self.slot() = None;
    }
}
