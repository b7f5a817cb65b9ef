//! Engine configuration.
//!
//! All knobs have defaults suitable for a single in-process pool; each can be
//! overridden programmatically or through a `CREWLINK_*` environment variable.

use serde::{Deserialize, Serialize};
use std::env;

/// Default hard cap on delegation chain depth.
pub const DEFAULT_MAX_DELEGATION_DEPTH: u32 = 5;

/// Default number of redelivery attempts after a failed channel send.
pub const DEFAULT_DELIVERY_RETRY_LIMIT: u32 = 1;

/// Default age in seconds after which a task is eligible for the staleness sweep.
pub const DEFAULT_STALE_TASK_MAX_AGE_SECS: u64 = 3600;

/// Default interval in milliseconds between polls of a remote report queue.
pub const DEFAULT_REPORT_POLL_INTERVAL_MS: u64 = 250;

/// Configuration for an orchestrator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum delegation chain depth, enforced at `delegate()` time.
    /// Bounds worst-case fan-out and prevents unbounded recursive delegation.
    pub max_delegation_depth: u32,
    /// Bounded retries performed by the channel router after a failed send.
    pub delivery_retry_limit: u32,
    /// Tasks older than this are removed by the staleness sweep.
    /// The sweep only runs when explicitly invoked.
    pub stale_task_max_age_secs: u64,
    /// Poll interval for the cross-process report queue pump.
    pub report_poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            delivery_retry_limit: DEFAULT_DELIVERY_RETRY_LIMIT,
            stale_task_max_age_secs: DEFAULT_STALE_TASK_MAX_AGE_SECS,
            report_poll_interval_ms: DEFAULT_REPORT_POLL_INTERVAL_MS,
        }
    }
}

impl OrchestratorConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_delegation_depth: env_u32(
                "CREWLINK_MAX_DELEGATION_DEPTH",
                defaults.max_delegation_depth,
            ),
            delivery_retry_limit: env_u32(
                "CREWLINK_DELIVERY_RETRY_LIMIT",
                defaults.delivery_retry_limit,
            ),
            stale_task_max_age_secs: env_u64(
                "CREWLINK_STALE_TASK_MAX_AGE_SECS",
                defaults.stale_task_max_age_secs,
            ),
            report_poll_interval_ms: env_u64(
                "CREWLINK_REPORT_POLL_INTERVAL_MS",
                defaults.report_poll_interval_ms,
            ),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
