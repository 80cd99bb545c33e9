//! In-process fabric: every registered node gets an unbounded channel and a
//! delivery thread that feeds its [`Upcall`].
//!
//! Membership is announced on registration, so a node never misses a join
//! even if it starts its delivery thread later. Crashes and leaves are
//! broadcast to every remaining node.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use raubzug_core::{PeerId, RaubzugError};

use crate::message::ReadMessage;
use crate::traits::{Connection, Fabric, MembershipEvent, Upcall};

enum Delivery {
    Message(ReadMessage),
    Membership(MembershipEvent),
    Shutdown,
}

struct Slot {
    tx: mpsc::UnboundedSender<Delivery>,
    halted: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    nodes: HashMap<PeerId, Slot>,
    departed: HashSet<PeerId>,
}

/// A set of nodes living in one process.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    registry: Arc<RwLock<Registry>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node to the network and announce it to every existing node.
    pub fn register(&self, id: PeerId) -> Arc<LocalFabric> {
        let (tx, rx) = mpsc::unbounded_channel();
        let halted = Arc::new(AtomicBool::new(false));

        let mut registry = self.write();
        registry.departed.remove(&id);
        for (other, slot) in &registry.nodes {
            let _ = slot
                .tx
                .send(Delivery::Membership(MembershipEvent::Joined(id.clone())));
            let _ = tx.send(Delivery::Membership(MembershipEvent::Joined(other.clone())));
        }
        registry.nodes.insert(
            id.clone(),
            Slot {
                tx,
                halted: halted.clone(),
            },
        );
        drop(registry);

        info!(peer = %id, "node joined local network");
        Arc::new(LocalFabric {
            network: self.clone(),
            id,
            rx: Mutex::new(Some(rx)),
            halted,
            thread: Mutex::new(None),
        })
    }

    /// Identities of every live node.
    pub fn members(&self) -> Vec<PeerId> {
        self.read().nodes.keys().cloned().collect()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.read().nodes.contains_key(id)
    }

    /// Kill a node: it stops receiving immediately and every other node is
    /// told it crashed.
    pub fn crash(&self, id: &PeerId) {
        self.depart(id, MembershipEvent::Crashed(id.clone()));
    }

    /// Orderly departure of a node.
    pub fn leave(&self, id: &PeerId) {
        self.depart(id, MembershipEvent::Left(id.clone()));
    }

    fn depart(&self, id: &PeerId, event: MembershipEvent) {
        let mut registry = self.write();
        let Some(slot) = registry.nodes.remove(id) else {
            debug!(peer = %id, "departure of unknown node ignored");
            return;
        };
        slot.halted.store(true, Ordering::SeqCst);
        let _ = slot.tx.send(Delivery::Shutdown);
        registry.departed.insert(id.clone());
        for other in registry.nodes.values() {
            let _ = other.tx.send(Delivery::Membership(event.clone()));
        }
        info!(peer = %id, ?event, "node departed local network");
    }

    fn send(&self, from: &PeerId, to: &PeerId, frame: Vec<u8>) -> Result<u64, RaubzugError> {
        let registry = self.read();
        // Departure and sending serialize on the registry lock, so nothing
        // from a departed node is delivered after its departure event.
        if !registry.nodes.contains_key(from) {
            return Err(RaubzugError::Disconnected(from.clone()));
        }
        let slot = registry
            .nodes
            .get(to)
            .ok_or_else(|| RaubzugError::Disconnected(to.clone()))?;
        let len = frame.len() as u64;
        slot.tx
            .send(Delivery::Message(ReadMessage::new(from.clone(), frame)))
            .map_err(|_| RaubzugError::Disconnected(to.clone()))?;
        Ok(len)
    }

    /// Announce a crash for a peer that is gone but was never announced.
    fn confirm_dead(&self, suspect: &PeerId) {
        let mut registry = self.write();
        if registry.nodes.contains_key(suspect) || registry.departed.contains(suspect) {
            return;
        }
        registry.departed.insert(suspect.clone());
        warn!(peer = %suspect, "suspected peer confirmed dead");
        for other in registry.nodes.values() {
            let _ = other
                .tx
                .send(Delivery::Membership(MembershipEvent::Crashed(suspect.clone())));
        }
    }

    /// Stop every delivery thread.
    pub fn shutdown(&self) {
        let registry = self.read();
        for slot in registry.nodes.values() {
            slot.halted.store(true, Ordering::SeqCst);
            let _ = slot.tx.send(Delivery::Shutdown);
        }
    }
}

/// One node's view of a [`LocalNetwork`].
pub struct LocalFabric {
    network: LocalNetwork,
    id: PeerId,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    halted: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalFabric {
    /// Start delivering messages and membership events to `upcall`.
    ///
    /// A fatal protocol error returned by the upcall terminates the process.
    pub fn start(&self, upcall: Arc<dyn Upcall>) -> Result<(), RaubzugError> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| RaubzugError::Config(format!("fabric for {} already started", self.id)))?;
        let halted = self.halted.clone();
        let id = self.id.clone();

        let handle = std::thread::Builder::new()
            .name(format!("raubzug-upcall-{}", self.id.name))
            .spawn(move || {
                while let Some(delivery) = rx.blocking_recv() {
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    match delivery {
                        Delivery::Message(message) => {
                            let origin = message.origin().clone();
                            if let Err(e) = upcall.message(message) {
                                if e.is_fatal() {
                                    error!(peer = %id, from = %origin, error = %e, "fatal protocol violation");
                                    std::process::exit(1);
                                }
                                warn!(peer = %id, from = %origin, error = %e, "message handling failed");
                            }
                        }
                        Delivery::Membership(event) => upcall.membership(event),
                        Delivery::Shutdown => break,
                    }
                }
                debug!(peer = %id, "delivery thread stopped");
            })?;

        *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Wait for the delivery thread to stop (after a crash, leave or
    /// network shutdown).
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Fabric for LocalFabric {
    fn local(&self) -> &PeerId {
        &self.id
    }

    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Connection>, RaubzugError> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(RaubzugError::Disconnected(self.id.clone()));
        }
        if !self.network.contains(peer) {
            return Err(RaubzugError::Disconnected(peer.clone()));
        }
        Ok(Arc::new(LocalConnection {
            network: self.network.clone(),
            from: self.id.clone(),
            to: peer.clone(),
            halted: self.halted.clone(),
        }))
    }

    fn maybe_dead(&self, peer: &PeerId) {
        self.network.confirm_dead(peer);
    }
}

struct LocalConnection {
    network: LocalNetwork,
    from: PeerId,
    to: PeerId,
    halted: Arc<AtomicBool>,
}

impl Connection for LocalConnection {
    fn remote(&self) -> &PeerId {
        &self.to
    }

    fn deliver(&self, frame: Vec<u8>) -> Result<u64, RaubzugError> {
        // A crashed sender stays silent.
        if self.halted.load(Ordering::SeqCst) {
            return Err(RaubzugError::Disconnected(self.from.clone()));
        }
        self.network.send(&self.from, &self.to, frame)
    }
}
