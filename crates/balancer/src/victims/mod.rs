//! Victim directory: every reachable peer, indexed flatly and by locality
//! group.
//!
//! The directory has no lock of its own. It lives inside the scheduler
//! state and is only reachable through the scheduler lock guard, so
//! multi-step read-modify sequences stay atomic.

mod cluster;
mod table;

pub use cluster::Cluster;
pub use table::{Victim, VictimTable};

#[cfg(test)]
mod tests;
