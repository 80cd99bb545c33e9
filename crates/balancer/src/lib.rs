//! Work-stealing load balancer: the victim directory, the outstanding job
//! registry, the steal protocol (requester and responder) and the result
//! channel, all serialized through one scheduler lock.

pub mod algorithm;
pub mod completion;
pub mod engine;
pub mod fault_tolerance;
pub mod membership;
pub mod node;
pub mod outstanding;
pub mod queue;
pub mod results;
pub mod state;
pub mod stats;
pub mod victims;
pub mod worker;

pub use algorithm::{ClusterAwareRandomStealing, RandomStealing, StealAlgorithm};
pub use completion::{Completion, ResultCollector};
pub use engine::{LoadBalancer, LoadBalancerBuilder};
pub use fault_tolerance::{FaultTolerance, NoFaultTolerance, ReplicatedTable};
pub use outstanding::OutstandingJobs;
pub use queue::{DequeQueue, WorkQueue};
pub use state::StealOutcome;
pub use stats::{StatsCollector, StatsSnapshot};
pub use victims::{Cluster, Victim, VictimTable};
pub use worker::{TaskRunner, WorkerBuilder, WorkerPool};
