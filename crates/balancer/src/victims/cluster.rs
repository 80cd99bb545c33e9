use indexmap::IndexSet;

use raubzug_core::{ClusterName, PeerId};

/// Peers sharing one locality domain, in join order.
///
/// Members are identities; the peers themselves live in the directory.
#[derive(Debug, Clone)]
pub struct Cluster {
    name: ClusterName,
    members: IndexSet<PeerId>,
}

impl Cluster {
    pub fn new(name: ClusterName) -> Self {
        Self {
            name,
            members: IndexSet::new(),
        }
    }

    pub fn name(&self) -> &ClusterName {
        &self.name
    }

    /// Returns false if the peer was already a member.
    pub fn add(&mut self, id: PeerId) -> bool {
        self.members.insert(id)
    }

    pub fn remove(&mut self, id: &PeerId) -> bool {
        self.members.shift_remove(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PeerId> {
        self.members.get_index(index)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.members.iter()
    }
}
