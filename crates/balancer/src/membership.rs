//! Reaction to peers joining, leaving and crashing.

use tracing::{info, warn};

use raubzug_core::PeerId;

use crate::engine::LoadBalancer;
use crate::state::StealOutcome;
use crate::victims::Victim;

impl LoadBalancer {
    pub fn handle_join(&self, peer: PeerId) {
        if peer == self.local {
            return;
        }
        let conn = match self.fabric.connect(&peer) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %peer, error = %e, "could not connect to joining peer");
                return;
            }
        };
        let mut state = self.lock();
        state.departed.remove(&peer);
        if state.victims.add(Victim::new(peer.clone(), conn)) {
            info!(peer = %peer, victims = state.victims.len(), "peer joined");
        }
        // Lookups may be waiting for this peer.
        self.cond.notify_all();
    }

    pub fn handle_leave(&self, peer: &PeerId) {
        self.peer_departed(peer, "left");
    }

    pub fn handle_crash(&self, peer: &PeerId) {
        self.peer_departed(peer, "crashed");
    }

    /// Purge a departed peer: cancel a steal addressed to it, drop it from
    /// the directory, redo the jobs it stole from us, forget the jobs it
    /// owns that a thief took from us and orphan the queued jobs it owns.
    fn peer_departed(&self, peer: &PeerId, reason: &'static str) {
        if peer == &self.local {
            return;
        }
        let redone = {
            let mut state = self.lock();
            state.departed.insert(peer.clone());
            if state.current_victim.as_ref() == Some(peer) && state.outcome.is_none() {
                state.outcome = Some(StealOutcome::VictimCrashed);
            }
            state.victims.remove(peer);
            state.steal_requests.retain(|(from, _)| from != peer);

            let redo = state.outstanding.remove_stolen_by(peer);
            let redone = redo.len();
            for task in redo {
                state.requeue(task);
            }
            // The thief reports these to the owner, not to us.
            let abandoned = state.outstanding.remove_owned_by(peer).len();
            let orphans = state.queue.mark_orphans_of(peer);
            self.cond.notify_all();

            info!(
                peer = %peer,
                reason,
                redone,
                abandoned,
                orphans,
                victims = state.victims.len(),
                "peer departed"
            );
            redone
        };
        self.stats.jobs_redone(redone);
        self.algorithm.victim_departed(self, peer);
    }
}
