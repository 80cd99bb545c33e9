use super::types::RaubzugConfig;
use crate::error::RaubzugError;

impl RaubzugConfig {
    /// Validate the config.
    pub fn validate(&self) -> Result<(), RaubzugError> {
        if self.node.cluster.trim().is_empty() {
            return Err(RaubzugError::Config("node.cluster must not be empty".into()));
        }
        if let Some(name) = &self.node.name {
            if name.trim().is_empty() {
                return Err(RaubzugError::Config("node.name must not be empty".into()));
            }
        }
        if self.balancer.lookup_poll_ms == 0 {
            return Err(RaubzugError::Config(
                "balancer.lookup_poll_ms must be greater than zero".into(),
            ));
        }
        if self.balancer.lookup_poll_ms > self.balancer.lookup_timeout_ms {
            return Err(RaubzugError::Config(format!(
                "balancer.lookup_poll_ms ({}) exceeds balancer.lookup_timeout_ms ({})",
                self.balancer.lookup_poll_ms, self.balancer.lookup_timeout_ms
            )));
        }
        Ok(())
    }
}
