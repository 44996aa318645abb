//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the backfill orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Snapshot/segment alignment granularity, in blocks.  Must be positive.
    pub save_interval: u64,

    /// Number of workers jobs are dispatched across.  Must be positive.
    pub worker_pool_size: usize,

    /// Maximum worker attempts per job; only transient failures are retried.
    pub max_retries: u32,

    /// How long the dispatcher sleeps when jobs remain but none is ready.
    pub ready_poll_interval: Duration,

    /// Hard cap on accumulated guest log bytes per module call.
    pub max_log_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            save_interval: 1_000,
            worker_pool_size: 4,
            max_retries: 3,
            ready_poll_interval: Duration::from_secs(1),
            max_log_bytes: 128 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.ready_poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_log_bytes, 131_072);
    }
}
