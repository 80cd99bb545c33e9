use std::collections::HashMap;

use raubzug_core::{PeerId, Stamp, Task};

/// Tasks currently away being executed by a thief, keyed by stamp.
#[derive(Debug, Default)]
pub struct OutstandingJobs {
    jobs: HashMap<Stamp, Task>,
}

impl OutstandingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stolen task. Replaces (and returns) a previous entry with
    /// the same stamp, which only happens when a redone task is stolen again.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.jobs.insert(task.stamp().clone(), task)
    }

    pub fn remove(&mut self, stamp: &Stamp) -> Option<Task> {
        self.jobs.remove(stamp)
    }

    pub fn contains(&self, stamp: &Stamp) -> bool {
        self.jobs.contains_key(stamp)
    }

    pub fn get(&self, stamp: &Stamp) -> Option<&Task> {
        self.jobs.get(stamp)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Take back every task stolen by `stealer`, e.g. after it crashed.
    pub fn remove_stolen_by(&mut self, stealer: &PeerId) -> Vec<Task> {
        self.remove_where(|task| task.stealer() == Some(stealer))
    }

    /// Take out every task owned by `owner`. Only happens for tasks we got
    /// from another node and then lost to a thief of our own.
    pub fn remove_owned_by(&mut self, owner: &PeerId) -> Vec<Task> {
        self.remove_where(|task| task.owner() == owner)
    }

    /// Removed tasks come back in stamp order.
    fn remove_where(&mut self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let stamps: Vec<Stamp> = self
            .jobs
            .iter()
            .filter(|(_, task)| pred(task))
            .map(|(stamp, _)| stamp.clone())
            .collect();
        let mut tasks: Vec<Task> = stamps
            .iter()
            .filter_map(|stamp| self.jobs.remove(stamp))
            .collect();
        tasks.sort_by(|a, b| a.stamp().cmp(b.stamp()));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stolen(seq: u64, thief: &str) -> Task {
        let owner = PeerId::new("owner", "d1");
        let mut task = Task::new(Stamp::new(owner.clone(), seq), owner, Vec::new());
        task.set_stealer(PeerId::new(thief, "d1"));
        task
    }

    #[test]
    fn lookup_by_stamp() {
        let mut jobs = OutstandingJobs::new();
        jobs.insert(stolen(7, "c"));
        let stamp = Stamp::new(PeerId::new("owner", "d1"), 7);
        assert!(jobs.contains(&stamp));
        assert_eq!(jobs.remove(&stamp).unwrap().stamp().seq, 7);
        assert!(jobs.remove(&stamp).is_none());
        assert!(jobs.is_empty());
    }

    #[test]
    fn remove_stolen_by_only_takes_that_thief() {
        let mut jobs = OutstandingJobs::new();
        jobs.insert(stolen(3, "x"));
        jobs.insert(stolen(1, "x"));
        jobs.insert(stolen(2, "y"));

        let redo = jobs.remove_stolen_by(&PeerId::new("x", "d1"));
        let seqs: Vec<u64> = redo.iter().map(|t| t.stamp().seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn remove_owned_by_leaves_other_owners() {
        let mut jobs = OutstandingJobs::new();
        jobs.insert(stolen(1, "x"));
        let remote = PeerId::new("r", "d2");
        let mut foreign = Task::new(Stamp::new(remote.clone(), 4), remote.clone(), Vec::new());
        foreign.set_stealer(PeerId::new("x", "d1"));
        jobs.insert(foreign);

        let dropped = jobs.remove_owned_by(&remote);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].owner(), &remote);
        assert_eq!(jobs.len(), 1);
        assert!(jobs.remove_owned_by(&remote).is_empty());
    }
}
