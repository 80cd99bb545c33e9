use std::sync::Arc;

use raubzug_core::{PeerId, RaubzugError};

use crate::message::{ReadMessage, WriteMessage};

/// A one-way channel to a single remote peer.
pub trait Connection: Send + Sync {
    fn remote(&self) -> &PeerId;

    /// Send one complete frame. Returns the number of bytes put on the wire.
    fn deliver(&self, frame: Vec<u8>) -> Result<u64, RaubzugError>;
}

/// The reliable message-passing layer a node runs on.
///
/// Delivery of incoming messages and membership changes happens through the
/// [`Upcall`] registered with the concrete implementation.
pub trait Fabric: Send + Sync {
    /// Identity of this node.
    fn local(&self) -> &PeerId;

    /// Open (or reuse) a connection to `peer`.
    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Connection>, RaubzugError>;

    /// Report that `peer` could not be found; the membership service decides
    /// whether it is dead and, if so, announces the crash.
    fn maybe_dead(&self, peer: &PeerId);

    /// Start a new message to `peer`.
    fn new_message(&self, peer: &PeerId) -> Result<WriteMessage, RaubzugError> {
        Ok(WriteMessage::new(self.connect(peer)?))
    }
}

/// Membership changes surfaced by the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(PeerId),
    Left(PeerId),
    Crashed(PeerId),
}

impl MembershipEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            MembershipEvent::Joined(p) | MembershipEvent::Left(p) | MembershipEvent::Crashed(p) => p,
        }
    }
}

/// Receiver side of the fabric, invoked on fabric delivery threads.
pub trait Upcall: Send + Sync {
    /// Handle one incoming message. Implementations must not block for long.
    fn message(&self, message: ReadMessage) -> Result<(), RaubzugError>;

    fn membership(&self, event: MembershipEvent);
}

/// Blanket implementation so `Arc<dyn Upcall>` can be used directly.
impl<T: Upcall + ?Sized> Upcall for Arc<T> {
    fn message(&self, message: ReadMessage) -> Result<(), RaubzugError> {
        (**self).message(message)
    }

    fn membership(&self, event: MembershipEvent) {
        (**self).membership(event)
    }
}
