use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Name of a locality domain ("cluster"). Peers sharing a name are considered
/// close to each other for steal-preference purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterName(pub String);

impl ClusterName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ClusterName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identity of a node taking part in the computation.
///
/// The identity carries the locality domain the node lives in, so any two
/// identities can be compared for same-domain vs cross-domain traffic without
/// consulting the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    pub name: String,
    pub cluster: ClusterName,
}

impl PeerId {
    pub fn new(name: impl Into<String>, cluster: impl Into<ClusterName>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }

    /// A fresh identity with a random (uuid v4) name.
    pub fn random(cluster: impl Into<ClusterName>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), cluster)
    }

    pub fn cluster(&self) -> &ClusterName {
        &self.cluster
    }

    /// Whether `other` lives in a different locality domain than `self`.
    pub fn in_different_cluster(&self, other: &PeerId) -> bool {
        self.cluster != other.cluster
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.cluster)
    }
}

/// Globally unique task identifier: the spawning node plus a per-node
/// sequence number. Never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stamp {
    pub origin: PeerId,
    pub seq: u64,
}

impl Stamp {
    pub fn new(origin: PeerId, seq: u64) -> Self {
        Self { origin, seq }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}

/// Hands out monotonically increasing stamps for one node.
#[derive(Debug)]
pub struct StampGenerator {
    origin: PeerId,
    next: AtomicU64,
}

impl StampGenerator {
    pub fn new(origin: PeerId) -> Self {
        Self {
            origin,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_stamp(&self) -> Stamp {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        Stamp::new(self.origin.clone(), seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_equality_includes_cluster() {
        let a = PeerId::new("n1", "d1");
        let b = PeerId::new("n1", "d1");
        let c = PeerId::new("n1", "d2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cluster_names_from_owned_and_borrowed_strings_agree() {
        let domain = format!("d{}", 3);
        assert_eq!(PeerId::new("n1", domain.clone()), PeerId::new("n1", "d3"));
        assert_eq!(ClusterName::from(domain).as_str(), "d3");
    }

    #[test]
    fn random_peer_ids_are_unique() {
        let a = PeerId::random("d1");
        let b = PeerId::random("d1");
        assert_ne!(a, b);
        assert_eq!(a.cluster, b.cluster);
    }

    #[test]
    fn different_cluster_check() {
        let a = PeerId::new("a", "d1");
        let b = PeerId::new("b", "d1");
        let c = PeerId::new("c", "d2");
        assert!(!a.in_different_cluster(&b));
        assert!(a.in_different_cluster(&c));
    }

    #[test]
    fn stamps_are_monotonic_and_never_reused() {
        let generator = StampGenerator::new(PeerId::new("n1", "d1"));
        let first = generator.next_stamp();
        let second = generator.next_stamp();
        assert!(second.seq > first.seq);
        assert_ne!(first, second);
    }

    #[test]
    fn display_formats() {
        let peer = PeerId::new("n1", "d1");
        assert_eq!(peer.to_string(), "n1@d1");
        assert_eq!(Stamp::new(peer, 7).to_string(), "n1@d1#7");
    }
}
