//! Load-balancing statistics and their exposure.
//!
//! Counters are plain atomics bumped from worker and upcall threads. A
//! [`StatsSnapshot`] is served as JSON via `GET /stats` (or
//! `GET /stats/{node}`) and logged periodically by the report task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use raubzug_core::PeerId;

#[derive(Debug, Default)]
struct Counters {
    steal_attempts: AtomicU64,
    steal_successes: AtomicU64,
    async_steal_attempts: AtomicU64,
    steal_requests: AtomicU64,
    stolen_jobs: AtomicU64,
    intra_cluster_messages: AtomicU64,
    intra_cluster_bytes: AtomicU64,
    inter_cluster_messages: AtomicU64,
    inter_cluster_bytes: AtomicU64,
    result_bytes: AtomicU64,
    results_received: AtomicU64,
    results_dropped: AtomicU64,
    jobs_redone: AtomicU64,
}

/// Shared handle to one node's counters.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    node: PeerId,
    counters: Arc<Counters>,
}

/// JSON-serializable view of a node's counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub node: String,
    pub cluster: String,
    pub taken_at: DateTime<Utc>,
    pub steal_attempts: u64,
    pub steal_successes: u64,
    pub async_steal_attempts: u64,
    pub steal_requests: u64,
    pub stolen_jobs: u64,
    pub intra_cluster_messages: u64,
    pub intra_cluster_bytes: u64,
    pub inter_cluster_messages: u64,
    pub inter_cluster_bytes: u64,
    pub result_bytes: u64,
    pub results_received: u64,
    pub results_dropped: u64,
    pub jobs_redone: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StatsCollector {
    pub fn new(node: PeerId) -> Self {
        Self {
            node,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn steal_attempt(&self) {
        bump(&self.counters.steal_attempts, 1);
    }

    pub fn steal_success(&self) {
        bump(&self.counters.steal_successes, 1);
    }

    pub fn async_steal_attempt(&self) {
        bump(&self.counters.async_steal_attempts, 1);
    }

    pub fn steal_request(&self) {
        bump(&self.counters.steal_requests, 1);
    }

    pub fn stolen_job(&self) {
        bump(&self.counters.stolen_jobs, 1);
    }

    /// Account one message sent to `dest`, split by locality.
    pub fn message_sent(&self, dest: &PeerId, bytes: u64) {
        let c = &self.counters;
        if self.node.in_different_cluster(dest) {
            bump(&c.inter_cluster_messages, 1);
            bump(&c.inter_cluster_bytes, bytes);
        } else {
            bump(&c.intra_cluster_messages, 1);
            bump(&c.intra_cluster_bytes, bytes);
        }
    }

    pub fn result_sent(&self, bytes: u64) {
        bump(&self.counters.result_bytes, bytes);
    }

    pub fn result_received(&self) {
        bump(&self.counters.results_received, 1);
    }

    pub fn result_dropped(&self) {
        bump(&self.counters.results_dropped, 1);
    }

    pub fn jobs_redone(&self, n: usize) {
        bump(&self.counters.jobs_redone, n as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let get = |a: &AtomicU64| a.load(Ordering::Relaxed);
        StatsSnapshot {
            node: self.node.name.clone(),
            cluster: self.node.cluster.to_string(),
            taken_at: Utc::now(),
            steal_attempts: get(&c.steal_attempts),
            steal_successes: get(&c.steal_successes),
            async_steal_attempts: get(&c.async_steal_attempts),
            steal_requests: get(&c.steal_requests),
            stolen_jobs: get(&c.stolen_jobs),
            intra_cluster_messages: get(&c.intra_cluster_messages),
            intra_cluster_bytes: get(&c.intra_cluster_bytes),
            inter_cluster_messages: get(&c.inter_cluster_messages),
            inter_cluster_bytes: get(&c.inter_cluster_bytes),
            result_bytes: get(&c.result_bytes),
            results_received: get(&c.results_received),
            results_dropped: get(&c.results_dropped),
            jobs_redone: get(&c.jobs_redone),
        }
    }
}

// ── Exposure ─────────────────────────────────────────────────────────

type Nodes = Arc<Vec<StatsCollector>>;

/// Resolves once `true` has been published on the shutdown channel, or the
/// sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Routes: `GET /stats` lists every node, `GET /stats/{node}` one node by
/// name.
pub fn stats_router(collectors: Vec<StatsCollector>) -> axum::Router {
    axum::Router::new()
        .route("/stats", axum::routing::get(all_nodes))
        .route("/stats/{node}", axum::routing::get(one_node))
        .with_state(Arc::new(collectors))
}

/// Serve [`stats_router`] on `port` until shutdown is signalled.
pub fn spawn_stats_server(
    port: u16,
    collectors: Vec<StatsCollector>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let nodes = collectors.len();
        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(port, error = %e, "stats endpoint not started");
                return;
            }
        };
        tracing::info!(port, nodes, "serving load balancing stats");

        let served = axum::serve(listener, stats_router(collectors))
            .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
            .await;
        if let Err(e) = served {
            tracing::warn!(port, error = %e, "stats endpoint failed");
        }
    })
}

/// Log every node's counters each `interval` until shutdown is signalled.
pub fn spawn_report_task(
    collectors: Vec<StatsCollector>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => collectors.iter().for_each(report),
                _ = stopped(&mut shutdown) => break,
            }
        }
    })
}

fn report(collector: &StatsCollector) {
    let s = collector.snapshot();
    tracing::info!(
        node = %s.node,
        steal_attempts = s.steal_attempts,
        steal_successes = s.steal_successes,
        stolen_jobs = s.stolen_jobs,
        jobs_redone = s.jobs_redone,
        intra_bytes = s.intra_cluster_bytes,
        inter_bytes = s.inter_cluster_bytes,
        "load balancing stats"
    );
}

async fn all_nodes(State(nodes): State<Nodes>) -> Json<Vec<StatsSnapshot>> {
    Json(nodes.iter().map(StatsCollector::snapshot).collect())
}

async fn one_node(
    State(nodes): State<Nodes>,
    Path(node): Path<String>,
) -> Result<Json<StatsSnapshot>, StatusCode> {
    nodes
        .iter()
        .find(|c| c.node.name == node)
        .map(|c| Json(c.snapshot()))
        .ok_or(StatusCode::NOT_FOUND)
}
