//! Fabric upcalls: decode each message and dispatch it by kind.

use tracing::debug;

use raubzug_core::RaubzugError;
use raubzug_fabric::{MembershipEvent, ReadMessage, Upcall, WireMessage};

use crate::engine::LoadBalancer;

impl Upcall for LoadBalancer {
    fn message(&self, mut message: ReadMessage) -> Result<(), RaubzugError> {
        let origin = message.origin().clone();
        let wire = WireMessage::read_from(&mut message)?;
        message.finish();

        match wire {
            WireMessage::StealRequest(request) => {
                // A blocking request may wait for work; doing that here would
                // stall every later upcall, including the membership events
                // that end the wait.
                if self.config.queue_steals || request.blocking {
                    if self.has_steal_handler() {
                        self.queue_steal_request(origin, request);
                        return Ok(());
                    }
                    let request = request.without_blocking();
                    return self.handle_steal_request(&origin, request);
                }
                self.handle_steal_request(&origin, request)
            }
            WireMessage::StealReply(reply) => self.handle_reply(&origin, reply),
            WireMessage::JobResult(result) => self.handle_job_result(&origin, result),
        }
    }

    fn membership(&self, event: MembershipEvent) {
        debug!(node = %self.local, ?event, "membership event");
        match event {
            MembershipEvent::Joined(peer) => self.handle_join(peer),
            MembershipEvent::Left(peer) => self.handle_leave(&peer),
            MembershipEvent::Crashed(peer) => self.handle_crash(&peer),
        }
    }
}
