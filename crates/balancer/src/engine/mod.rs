//! The steal protocol engine.
//!
//! One [`LoadBalancer`] per node. Worker threads drive the requester side
//! ([`LoadBalancer::steal`]); fabric upcalls and the steal handler thread
//! drive the responder side ([`LoadBalancer::handle_steal_request`]). Both
//! sides, the result channel and membership handling serialize through the
//! single scheduler lock and share one condition variable for every wait.

mod requester;
mod responder;

#[cfg(test)]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tracing::{debug, info};

use raubzug_core::config::{AlgorithmKind, BalancerConfig};
use raubzug_core::{PeerId, RaubzugError, Stamp, StampGenerator, Task};
use raubzug_fabric::{Fabric, WireMessage};

use crate::algorithm::{ClusterAwareRandomStealing, RandomStealing, StealAlgorithm};
use crate::completion::{Completion, ResultCollector};
use crate::fault_tolerance::{FaultTolerance, NoFaultTolerance};
use crate::queue::{DequeQueue, WorkQueue};
use crate::state::SchedulerState;
use crate::stats::StatsCollector;
use crate::victims::Victim;

pub struct LoadBalancer {
    pub(crate) local: PeerId,
    pub(crate) fabric: Arc<dyn Fabric>,
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) cond: Condvar,
    pub(crate) config: BalancerConfig,
    pub(crate) ft: Arc<dyn FaultTolerance>,
    pub(crate) completion: Arc<dyn Completion>,
    pub(crate) algorithm: Box<dyn StealAlgorithm>,
    pub(crate) stats: StatsCollector,
    /// Set whenever a result lands on the pending list; lets the drain at
    /// safe points skip the lock when there is nothing to do.
    pub(crate) received_results: AtomicBool,
    /// Serializes synchronous steals of this node.
    pub(crate) steal_slot: Mutex<()>,
    stamps: StampGenerator,
    steal_handler: Mutex<Option<JoinHandle<()>>>,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Fluent builder for a [`LoadBalancer`].
///
/// # Example
/// ```ignore
/// let lb = LoadBalancer::builder(fabric.clone())
///     .config(config.balancer.clone())
///     .completion(collector.clone())
///     .build();
/// fabric.start(lb.clone())?;
/// lb.start()?;
/// ```
pub struct LoadBalancerBuilder {
    fabric: Arc<dyn Fabric>,
    config: BalancerConfig,
    fault_tolerance: Arc<dyn FaultTolerance>,
    completion: Arc<dyn Completion>,
    algorithm: Option<Box<dyn StealAlgorithm>>,
    queue: Box<dyn WorkQueue>,
}

impl LoadBalancerBuilder {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            config: BalancerConfig::default(),
            fault_tolerance: Arc::new(NoFaultTolerance),
            completion: Arc::new(ResultCollector::new()),
            algorithm: None,
            queue: Box::new(DequeQueue::new()),
        }
    }

    pub fn config(mut self, config: BalancerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fault_tolerance(mut self, ft: Arc<dyn FaultTolerance>) -> Self {
        self.fault_tolerance = ft;
        self
    }

    pub fn completion(mut self, completion: Arc<dyn Completion>) -> Self {
        self.completion = completion;
        self
    }

    /// Override the algorithm named in the config.
    pub fn algorithm(mut self, algorithm: Box<dyn StealAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn queue(mut self, queue: Box<dyn WorkQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn build(self) -> Arc<LoadBalancer> {
        let local = self.fabric.local().clone();
        let algorithm: Box<dyn StealAlgorithm> = match self.algorithm {
            Some(algorithm) => algorithm,
            None => match self.config.algorithm {
                AlgorithmKind::Random => Box::new(RandomStealing),
                AlgorithmKind::ClusterAware => Box::new(ClusterAwareRandomStealing::new()),
            },
        };
        info!(node = %local, algorithm = algorithm.name(), wait_mode = ?self.config.wait_mode, "load balancer created");

        Arc::new(LoadBalancer {
            stats: StatsCollector::new(local.clone()),
            stamps: StampGenerator::new(local.clone()),
            state: Mutex::new(SchedulerState::new(local.clone(), self.queue)),
            local,
            fabric: self.fabric,
            cond: Condvar::new(),
            config: self.config,
            ft: self.fault_tolerance,
            completion: self.completion,
            algorithm,
            received_results: AtomicBool::new(false),
            steal_slot: Mutex::new(()),
            steal_handler: Mutex::new(None),
        })
    }
}

// ── LoadBalancer ─────────────────────────────────────────────────────

impl LoadBalancer {
    pub fn builder(fabric: Arc<dyn Fabric>) -> LoadBalancerBuilder {
        LoadBalancerBuilder::new(fabric)
    }

    /// Acquire the scheduler lock. The guarded state is consistent between
    /// statements, so a poisoned lock is recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait on the scheduler condition variable.
    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, SchedulerState>) -> MutexGuard<'a, SchedulerState> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Start the steal handler thread. It serves every queued request, and
    /// blocking requests even when `queue_steals` is off.
    pub fn start(self: &Arc<Self>) -> Result<(), RaubzugError> {
        let mut slot = self.steal_handler.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        let lb = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("raubzug-steal-handler-{}", self.local.name))
            .spawn(move || lb.steal_handler_loop())?;
        *slot = Some(handle);
        Ok(())
    }

    /// Wake every waiter with "exiting" and stop the steal handler.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.exiting {
                return;
            }
            state.exiting = true;
            state.steal_requests.clear();
            self.cond.notify_all();
        }
        self.algorithm.exit(self);

        let handle = self
            .steal_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        info!(node = %self.local, "load balancer stopped");
    }

    /// Whether a steal handler thread is serving queued requests.
    pub fn has_steal_handler(&self) -> bool {
        self.steal_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Read-only statistics of this node.
    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn is_exiting(&self) -> bool {
        self.lock().exiting
    }

    // ── Local work ───────────────────────────────────────────────────

    /// Create a task owned by this node and push it on the local queue.
    pub fn spawn(&self, params: Vec<u8>) -> Stamp {
        let stamp = self.stamps.next_stamp();
        let task = Task::new(stamp.clone(), self.local.clone(), params);
        let mut state = self.lock();
        state.queue.push_head(task);
        self.cond.notify_all();
        debug!(stamp = %stamp, queued = state.queue.len(), "spawned task");
        stamp
    }

    /// Next task for a local worker.
    pub fn next_local_task(&self) -> Option<Task> {
        self.lock().queue.pop_head()
    }

    pub fn add_to_queue_tail(&self, task: Task) {
        let mut state = self.lock();
        state.queue.add_to_tail(task);
        self.cond.notify_all();
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_queued(&self, stamp: &Stamp) -> bool {
        self.lock().queue.contains(stamp)
    }

    pub fn outstanding_len(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn is_outstanding(&self, stamp: &Stamp) -> bool {
        self.lock().outstanding.contains(stamp)
    }

    /// Steal requests waiting for the handler thread.
    pub fn queued_steal_requests(&self) -> usize {
        self.lock().steal_requests.len()
    }

    // ── Victim directory ─────────────────────────────────────────────

    pub fn victim_count(&self) -> usize {
        self.lock().victims.len()
    }

    pub fn knows_victim(&self, id: &PeerId) -> bool {
        self.lock().victims.contains(id)
    }

    pub fn victim_identities(&self) -> Vec<PeerId> {
        self.lock().victims.all_identities()
    }

    pub fn victims_consistent(&self) -> bool {
        self.lock().victims.is_consistent()
    }

    pub fn random_victim(&self) -> Option<PeerId> {
        let state = self.lock();
        let victim = state.victims.random_any(&mut rand::thread_rng())?;
        Some(victim.id().clone())
    }

    pub fn random_local_victim(&self) -> Option<PeerId> {
        let state = self.lock();
        let victim = state.victims.random_local(&mut rand::thread_rng())?;
        Some(victim.id().clone())
    }

    pub fn random_remote_victim(&self) -> Option<PeerId> {
        let state = self.lock();
        let victim = state.victims.random_remote(&mut rand::thread_rng())?;
        Some(victim.id().clone())
    }

    /// One round of the configured steal algorithm.
    pub fn client_iteration(&self) -> Option<Task> {
        self.algorithm.client_iteration(self)
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    // ── Wire ─────────────────────────────────────────────────────────

    /// Encode and send one message, accounting its bytes by locality.
    pub(crate) fn send_message(&self, to: &Victim, message: &WireMessage) -> Result<u64, RaubzugError> {
        let mut m = to.new_message();
        message.write_to(&mut m)?;
        let bytes = m.finish()?;
        self.stats.message_sent(to.id(), bytes);
        debug!(to = %to.id(), opcode = %message.opcode(), bytes, "sent");
        Ok(bytes)
    }
}
