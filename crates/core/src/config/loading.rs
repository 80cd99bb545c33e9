use std::path::Path;

use crate::error::RaubzugError;
use crate::ids::PeerId;

use super::types::{AlgorithmKind, RaubzugConfig, WaitMode};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl RaubzugConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RaubzugError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RaubzugError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Config for a node in the given locality domain, everything else default.
    pub fn local(cluster: &str) -> Self {
        let mut config = Self::default();
        config.node.cluster = cluster.to_string();
        config
    }

    /// The identity this node announces to its peers.
    pub fn peer_id(&self) -> PeerId {
        match &self.node.name {
            Some(name) => PeerId::new(name.clone(), self.node.cluster.as_str()),
            None => PeerId::random(self.node.cluster.as_str()),
        }
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `RAUBZUG_CLUSTER` -> `node.cluster`
    /// - `RAUBZUG_NODE_NAME` -> `node.name`
    /// - `RAUBZUG_WAIT_MODE` -> `balancer.wait_mode` ("upcall" | "poll")
    /// - `RAUBZUG_ALGORITHM` -> `balancer.algorithm` ("random" | "cluster-aware")
    /// - `RAUBZUG_QUEUE_STEALS` -> `balancer.queue_steals`
    /// - `RAUBZUG_LOOKUP_TIMEOUT_MS` -> `balancer.lookup_timeout_ms`
    /// - `RAUBZUG_LOOKUP_POLL_MS` -> `balancer.lookup_poll_ms`
    /// - `RAUBZUG_STATS_PORT` -> `stats.http_port`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RAUBZUG_CLUSTER") {
            self.node.cluster = v;
        }
        if let Ok(v) = std::env::var("RAUBZUG_NODE_NAME") {
            self.node.name = Some(v);
        }
        if let Ok(v) = std::env::var("RAUBZUG_WAIT_MODE") {
            match v.as_str() {
                "upcall" => self.balancer.wait_mode = WaitMode::Upcall,
                "poll" => self.balancer.wait_mode = WaitMode::Poll,
                other => tracing::warn!(value = other, "ignoring unknown RAUBZUG_WAIT_MODE"),
            }
        }
        if let Ok(v) = std::env::var("RAUBZUG_ALGORITHM") {
            match v.as_str() {
                "random" => self.balancer.algorithm = AlgorithmKind::Random,
                "cluster-aware" => self.balancer.algorithm = AlgorithmKind::ClusterAware,
                other => tracing::warn!(value = other, "ignoring unknown RAUBZUG_ALGORITHM"),
            }
        }
        if let Ok(v) = std::env::var("RAUBZUG_QUEUE_STEALS") {
            if let Ok(flag) = v.parse::<bool>() {
                self.balancer.queue_steals = flag;
            }
        }
        if let Ok(v) = std::env::var("RAUBZUG_LOOKUP_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.balancer.lookup_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RAUBZUG_LOOKUP_POLL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.balancer.lookup_poll_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RAUBZUG_STATS_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.stats.http_port = Some(port);
            }
        }
    }
}
