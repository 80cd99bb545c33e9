//! Contract of the local task queue, plus a double-ended default.
//!
//! The owning node pushes and pops at the head; thieves take from the tail,
//! which holds the oldest and usually largest-grained work.

use std::collections::VecDeque;

use raubzug_core::{PeerId, Stamp, Task};

pub trait WorkQueue: Send {
    /// Newly spawned work.
    fn push_head(&mut self, task: Task);

    /// Next task for a local worker.
    fn pop_head(&mut self) -> Option<Task>;

    /// Oldest task, for a thief.
    fn steal_tail(&mut self) -> Option<Task>;

    /// Redone or asynchronously stolen work.
    fn add_to_tail(&mut self, task: Task);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, stamp: &Stamp) -> bool;

    /// Flag every queued task owned by `owner` as an orphan. Returns how
    /// many were flagged.
    fn mark_orphans_of(&mut self, owner: &PeerId) -> usize;
}

#[derive(Debug, Default)]
pub struct DequeQueue {
    tasks: VecDeque<Task>,
}

impl DequeQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for DequeQueue {
    fn push_head(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    fn pop_head(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    fn steal_tail(&mut self) -> Option<Task> {
        self.tasks.pop_back()
    }

    fn add_to_tail(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn contains(&self, stamp: &Stamp) -> bool {
        self.tasks.iter().any(|t| t.stamp() == stamp)
    }

    fn mark_orphans_of(&mut self, owner: &PeerId) -> usize {
        let mut marked = 0;
        for task in self.tasks.iter_mut().filter(|t| t.owner() == owner && !t.is_orphan()) {
            task.mark_orphan();
            marked += 1;
        }
        marked
    }
}
