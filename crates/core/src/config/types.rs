use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for one load-balancing node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RaubzugConfig {
    /// Identity of this node.
    #[serde(default)]
    pub node: NodeConfig,

    /// Steal protocol tuning.
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Statistics reporting.
    #[serde(default)]
    pub stats: StatsConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Node section: who we are and which locality domain we live in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Locality domain ("cluster") of this node.
    #[serde(default = "default_cluster")]
    pub cluster: String,

    /// Node name. A random uuid is used when absent.
    pub name: Option<String>,
}

fn default_cluster() -> String {
    "default".into()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            name: None,
        }
    }
}

/// How a requester waits for a steal reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// Replies are delivered by upcall threads; block on the condition variable.
    #[default]
    Upcall,
    /// Alternate between draining delayed messages and re-checking.
    Poll,
}

/// Which steal algorithm idle workers use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    /// Synchronous steal from a uniformly random peer.
    #[default]
    Random,
    /// One asynchronous cross-domain steal in flight plus synchronous
    /// same-domain steals.
    ClusterAware,
}

/// Balancer section: steal protocol behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub wait_mode: WaitMode,

    #[serde(default)]
    pub algorithm: AlgorithmKind,

    /// Hand incoming steal requests to a dedicated handler thread instead of
    /// serving them on the upcall thread.
    #[serde(default = "default_queue_steals")]
    pub queue_steals: bool,

    /// How long a lookup by identity keeps retrying before the peer is
    /// presumed dead.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Poll interval of the lookup retry.
    #[serde(default = "default_lookup_poll_ms")]
    pub lookup_poll_ms: u64,

    /// Sleep between unsuccessful steal rounds of an idle worker.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

fn default_queue_steals() -> bool {
    true
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_lookup_poll_ms() -> u64 {
    100
}

fn default_idle_backoff_ms() -> u64 {
    5
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            wait_mode: WaitMode::default(),
            algorithm: AlgorithmKind::default(),
            queue_steals: default_queue_steals(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            lookup_poll_ms: default_lookup_poll_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl BalancerConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn lookup_poll(&self) -> Duration {
        Duration::from_millis(self.lookup_poll_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// Stats section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Port of the `GET /stats` JSON endpoint. Disabled when absent.
    pub http_port: Option<u16>,

    /// Interval in seconds between stats log lines (0 = disabled).
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    30
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            http_port: None,
            report_interval_secs: default_report_interval(),
        }
    }
}
