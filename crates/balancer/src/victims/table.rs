use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;

use raubzug_core::{ClusterName, PeerId};
use raubzug_fabric::{Connection, WriteMessage};

use super::cluster::Cluster;

/// A reachable remote node and the connection used to reach it.
#[derive(Clone)]
pub struct Victim {
    id: PeerId,
    conn: Arc<dyn Connection>,
}

impl Victim {
    pub fn new(id: PeerId, conn: Arc<dyn Connection>) -> Self {
        Self { id, conn }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn cluster(&self) -> &ClusterName {
        &self.id.cluster
    }

    pub fn new_message(&self) -> WriteMessage {
        WriteMessage::new(self.conn.clone())
    }
}

impl fmt::Debug for Victim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Victim").field("id", &self.id).finish()
    }
}

/// Directory of reachable peers for one node.
#[derive(Debug)]
pub struct VictimTable {
    /// The node owning this directory; never a member of it.
    local: PeerId,
    victims: IndexMap<PeerId, Victim>,
    clusters: IndexMap<ClusterName, Cluster>,
}

impl VictimTable {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            victims: IndexMap::new(),
            clusters: IndexMap::new(),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Add a peer. Returns false if it is already present (or is the local
    /// node), leaving the directory unchanged.
    pub fn add(&mut self, victim: Victim) -> bool {
        if victim.id == self.local || self.victims.contains_key(&victim.id) {
            return false;
        }
        let id = victim.id.clone();
        self.clusters
            .entry(id.cluster.clone())
            .or_insert_with(|| Cluster::new(id.cluster.clone()))
            .add(id.clone());
        self.victims.insert(id, victim);
        true
    }

    /// Remove a peer and drop its locality group once empty.
    pub fn remove(&mut self, id: &PeerId) -> Option<Victim> {
        let victim = self.victims.shift_remove(id)?;
        if let Some(cluster) = self.clusters.get_mut(&id.cluster) {
            cluster.remove(id);
            if cluster.is_empty() {
                self.clusters.shift_remove(&id.cluster);
            }
        }
        Some(victim)
    }

    pub fn remove_index(&mut self, index: usize) -> Option<Victim> {
        let id = self.victims.get_index(index)?.0.clone();
        self.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.victims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Victim> {
        self.victims.get_index(index).map(|(_, v)| v)
    }

    pub fn get_by_id(&self, id: &PeerId) -> Option<&Victim> {
        self.victims.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.victims.contains_key(id)
    }

    pub fn all_identities(&self) -> Vec<PeerId> {
        self.victims.keys().cloned().collect()
    }

    pub fn cluster(&self, name: &ClusterName) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn own_cluster(&self) -> Option<&Cluster> {
        self.clusters.get(&self.local.cluster)
    }

    /// Uniform pick across all peers.
    pub fn random_any<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Victim> {
        if self.victims.is_empty() {
            return None;
        }
        self.get(rng.gen_range(0..self.victims.len()))
    }

    /// Uniform pick among peers sharing the local node's locality group.
    pub fn random_local<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Victim> {
        let own = self.own_cluster()?;
        if own.is_empty() {
            return None;
        }
        let id = own.get(rng.gen_range(0..own.len()))?;
        self.victims.get(id)
    }

    /// Uniform pick among peers outside the local node's locality group.
    ///
    /// Picks an index into the virtual range of remote peers and resolves
    /// it by walking the groups in registration order, skipping our own.
    pub fn random_remote<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Victim> {
        let own_size = self.own_cluster().map_or(0, Cluster::len);
        let remote = self.victims.len() - own_size;
        if remote == 0 {
            return None;
        }

        let mut index = rng.gen_range(0..remote);
        for cluster in self.clusters.values() {
            if cluster.name() == &self.local.cluster {
                continue;
            }
            if index < cluster.len() {
                return cluster.get(index).and_then(|id| self.victims.get(id));
            }
            index -= cluster.len();
        }
        None
    }

    /// Every peer is in exactly one group matching its domain, every group
    /// member is in the directory, and no group is empty.
    pub fn is_consistent(&self) -> bool {
        let grouped: usize = self.clusters.values().map(Cluster::len).sum();
        grouped == self.victims.len()
            && self.clusters.iter().all(|(name, cluster)| {
                !cluster.is_empty()
                    && cluster.name() == name
                    && cluster
                        .iter()
                        .all(|id| &id.cluster == name && self.victims.contains_key(id))
            })
    }
}
