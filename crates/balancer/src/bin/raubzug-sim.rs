//! raubzug-sim: run a work-stealing computation over an in-process network.
//!
//! Node 0 spawns every task; the other nodes start idle and steal. Nodes are
//! spread round-robin over the locality domains `d0..dN`. Optionally one
//! node is crashed mid-run to exercise job redo.
//!
//! # Usage
//!
//! ```bash
//! # Four nodes in two domains, 500 tasks
//! raubzug-sim --nodes 4 --clusters 2 --tasks 500
//!
//! # Cluster-aware stealing, crash node 3 after 200ms, serve /stats on 9100
//! RAUBZUG_ALGORITHM=cluster-aware raubzug-sim --crash 3 --crash-after-ms 200 --stats-port 9100
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use raubzug_balancer::{
    stats, LoadBalancer, ResultCollector, StatsCollector, WorkerBuilder, WorkerPool,
};
use raubzug_core::config::{load_dotenv, RaubzugConfig};
use raubzug_core::{PeerId, RemoteException, Task};
use raubzug_fabric::LocalNetwork;

/// Simulate distributed work stealing between in-process nodes.
#[derive(Parser, Debug)]
#[command(name = "raubzug-sim", version, about)]
struct Cli {
    /// Number of nodes.
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    /// Number of locality domains the nodes are spread over.
    #[arg(long, default_value_t = 2)]
    clusters: usize,

    /// Tasks spawned on node 0.
    #[arg(long, default_value_t = 200)]
    tasks: u64,

    /// Worker threads per node.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Simulated work per task, in milliseconds.
    #[arg(long, default_value_t = 5)]
    work_ms: u64,

    /// Every n-th task raises an exception (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Index of a node to crash during the run (node 0 cannot be crashed).
    #[arg(long)]
    crash: Option<usize>,

    /// Delay before the crash, in milliseconds.
    #[arg(long, default_value_t = 100)]
    crash_after_ms: u64,

    /// TOML config shared by every node.
    #[arg(long, env = "RAUBZUG_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// HTTP port for the `/stats` JSON endpoint (overrides the config).
    #[arg(long)]
    stats_port: Option<u16>,

    /// Give up waiting for results after this many seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

struct SimNode {
    id: PeerId,
    lb: Arc<LoadBalancer>,
    pool: WorkerPool,
}

fn runner(work: Duration, fail_every: u64) -> impl Fn(&Task) -> Result<Vec<u8>, RemoteException> {
    move |task: &Task| {
        let n: u64 = task
            .decode_params()
            .map_err(|e| RemoteException::new("DecodeError", e.to_string()))?;
        std::thread::sleep(work);
        if fail_every > 0 && n % fail_every == fail_every - 1 {
            return Err(RemoteException::new("SimulatedFailure", format!("task {n} failed")));
        }
        rmp_serde::to_vec(&n.wrapping_mul(n))
            .map_err(|e| RemoteException::new("EncodeError", e.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting raubzug-sim");

    anyhow::ensure!(cli.nodes >= 1, "need at least one node");
    anyhow::ensure!(cli.clusters >= 1, "need at least one locality domain");
    if let Some(idx) = cli.crash {
        anyhow::ensure!(
            idx > 0 && idx < cli.nodes,
            "crash index must name a node other than node 0"
        );
    }

    let config = match &cli.config {
        Some(path) => RaubzugConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RaubzugConfig::from_toml("")?,
    };
    let stats_port = cli.stats_port.or(config.stats.http_port);

    let network = LocalNetwork::new();
    let owner_results = Arc::new(ResultCollector::new());
    let work = Duration::from_millis(cli.work_ms);

    let mut nodes = Vec::with_capacity(cli.nodes);
    for i in 0..cli.nodes {
        let id = PeerId::new(format!("node-{i}"), format!("d{}", i % cli.clusters));
        let fabric = network.register(id.clone());
        let results = if i == 0 {
            owner_results.clone()
        } else {
            Arc::new(ResultCollector::new())
        };
        let lb = LoadBalancer::builder(fabric.clone())
            .config(config.balancer.clone())
            .completion(results)
            .build();
        fabric.start(lb.clone())?;
        lb.start()?;
        let pool = WorkerBuilder::new(lb.clone())
            .threads(cli.threads)
            .runner(runner(work, cli.fail_every))
            .spawn()?;
        nodes.push(SimNode { id, lb, pool });
    }

    let collectors: Vec<StatsCollector> = nodes.iter().map(|n| n.lb.stats().clone()).collect();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut background = Vec::new();
    if let Some(port) = stats_port {
        background.push(stats::spawn_stats_server(
            port,
            collectors.clone(),
            shutdown_rx.clone(),
        ));
    }
    if config.stats.report_interval_secs > 0 {
        background.push(stats::spawn_report_task(
            collectors.clone(),
            Duration::from_secs(config.stats.report_interval_secs),
            shutdown_rx,
        ));
    }

    let started = std::time::Instant::now();
    for n in 0..cli.tasks {
        nodes[0].lb.spawn(rmp_serde::to_vec(&n)?);
    }
    tracing::info!(tasks = cli.tasks, nodes = cli.nodes, "tasks spawned on node-0");

    if let Some(idx) = cli.crash {
        tokio::time::sleep(Duration::from_millis(cli.crash_after_ms)).await;
        tracing::warn!(node = %nodes[idx].id, "crashing node");
        network.crash(&nodes[idx].id);
    }

    let expected = cli.tasks as usize;
    let timeout = Duration::from_secs(cli.timeout_secs);
    let waiting = owner_results.clone();
    let finished = tokio::task::spawn_blocking(move || waiting.wait_for(expected, timeout)).await?;
    let elapsed = started.elapsed();

    if finished {
        tracing::info!(
            results = owner_results.len(),
            exceptions = owner_results.exceptions(),
            elapsed_ms = elapsed.as_millis() as u64,
            "all results collected"
        );
    } else {
        tracing::error!(
            results = owner_results.len(),
            expected,
            "timed out waiting for results"
        );
    }

    let snapshots: Vec<_> = collectors.iter().map(StatsCollector::snapshot).collect();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    let _ = shutdown_tx.send(true);
    for handle in background {
        handle.await.ok();
    }
    tokio::task::spawn_blocking(move || {
        for node in nodes {
            node.pool.shutdown();
        }
        network.shutdown();
    })
    .await?;

    anyhow::ensure!(finished, "only {} of {expected} results arrived", owner_results.len());
    Ok(())
}
