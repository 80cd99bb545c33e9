use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use raubzug_core::{PeerId, RaubzugError};
use raubzug_fabric::Connection;

use super::{Victim, VictimTable};

struct NullConnection(PeerId);

impl Connection for NullConnection {
    fn remote(&self) -> &PeerId {
        &self.0
    }

    fn deliver(&self, frame: Vec<u8>) -> Result<u64, RaubzugError> {
        Ok(frame.len() as u64)
    }
}

fn victim(name: &str, cluster: &str) -> Victim {
    let id = PeerId::new(name, cluster);
    Victim::new(id.clone(), Arc::new(NullConnection(id)))
}

/// P1 is the local node; P2 shares its domain, P3 does not.
fn scenario_a() -> VictimTable {
    let mut table = VictimTable::new(PeerId::new("p1", "d1"));
    assert!(table.add(victim("p2", "d1")));
    assert!(table.add(victim("p3", "d2")));
    table
}

#[test]
fn random_local_and_remote_are_determined_when_groups_have_one_peer() {
    let table = scenario_a();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..100 {
        assert_eq!(table.random_local(&mut rng).unwrap().id().name, "p2");
        assert_eq!(table.random_remote(&mut rng).unwrap().id().name, "p3");
    }
}

#[test]
fn duplicate_identity_is_rejected() {
    let mut table = scenario_a();
    assert!(!table.add(victim("p2", "d1")));
    assert_eq!(table.len(), 2);
    assert!(table.is_consistent());
}

#[test]
fn local_node_is_never_a_victim() {
    let mut table = scenario_a();
    assert!(!table.add(victim("p1", "d1")));
    assert!(!table.contains(&PeerId::new("p1", "d1")));
}

#[test]
fn removing_last_member_drops_the_group() {
    let mut table = scenario_a();
    assert_eq!(table.cluster_count(), 2);

    let removed = table.remove(&PeerId::new("p3", "d2")).unwrap();
    assert_eq!(removed.id().name, "p3");
    assert_eq!(table.cluster_count(), 1);
    assert!(table.cluster(&"d2".into()).is_none());
    assert!(table.is_consistent());

    let mut rng = StdRng::seed_from_u64(1);
    assert!(table.random_remote(&mut rng).is_none());
}

#[test]
fn remove_unknown_is_none() {
    let mut table = scenario_a();
    assert!(table.remove(&PeerId::new("nobody", "d1")).is_none());
    assert!(table.remove_index(5).is_none());
    assert_eq!(table.len(), 2);
}

#[test]
fn remove_by_index_keeps_groups_in_sync() {
    let mut table = scenario_a();
    let first = table.get(0).unwrap().id().clone();
    let removed = table.remove_index(0).unwrap();
    assert_eq!(removed.id(), &first);
    assert!(!table.contains(&first));
    assert!(table.is_consistent());
}

#[test]
fn empty_directory_selects_nothing() {
    let table = VictimTable::new(PeerId::new("solo", "d1"));
    let mut rng = StdRng::seed_from_u64(3);
    assert!(table.random_any(&mut rng).is_none());
    assert!(table.random_local(&mut rng).is_none());
    assert!(table.random_remote(&mut rng).is_none());
    assert!(table.is_consistent());
}

#[test]
fn alone_in_own_group_has_no_local_victim() {
    let mut table = VictimTable::new(PeerId::new("p1", "d1"));
    table.add(victim("x", "d2"));
    table.add(victim("y", "d3"));
    let mut rng = StdRng::seed_from_u64(11);
    assert!(table.random_local(&mut rng).is_none());
    assert!(table.random_remote(&mut rng).is_some());
}

#[test]
fn selection_respects_group_bounds() {
    let mut table = VictimTable::new(PeerId::new("me", "d1"));
    for i in 0..5 {
        table.add(victim(&format!("a{i}"), "d1"));
        table.add(victim(&format!("b{i}"), "d2"));
        table.add(victim(&format!("c{i}"), "d3"));
    }
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        assert_eq!(table.random_local(&mut rng).unwrap().cluster().as_str(), "d1");
        assert_ne!(table.random_remote(&mut rng).unwrap().cluster().as_str(), "d1");
        assert!(table.random_any(&mut rng).is_some());
    }
}

#[test]
fn random_remote_reaches_every_remote_peer() {
    let mut table = VictimTable::new(PeerId::new("me", "d1"));
    table.add(victim("a", "d1"));
    table.add(victim("b", "d2"));
    table.add(victim("c", "d3"));
    table.add(victim("d", "d3"));

    let mut rng = StdRng::seed_from_u64(9);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        seen.insert(table.random_remote(&mut rng).unwrap().id().name.clone());
    }
    let expected: std::collections::HashSet<String> =
        ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
    assert_eq!(seen, expected);
}

#[test]
fn interleaved_adds_and_removes_stay_consistent() {
    let mut table = VictimTable::new(PeerId::new("me", "d0"));
    let mut rng = StdRng::seed_from_u64(5);
    for round in 0..200u32 {
        let name = format!("n{}", round % 17);
        let cluster = format!("d{}", round % 3);
        if rand::Rng::gen_bool(&mut rng, 0.6) {
            table.add(victim(&name, &cluster));
        } else {
            table.remove(&PeerId::new(name, cluster));
        }
        assert!(table.is_consistent(), "inconsistent after round {round}");
    }
    assert_eq!(table.all_identities().len(), table.len());
}
