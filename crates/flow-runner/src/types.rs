//! Runner configuration and results.

use serde::{Deserialize, Serialize};

use node_registry::RunLogEntry;
use reflow_core_types::{FlowId, RunId};

/// Engine execution limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineLimits {
    /// Hard upper bound on foreach worker fan-out, whatever the node asks
    /// for.
    pub max_foreach_concurrency: usize,
    /// Hard cap for any single in-step wait.
    pub wait_cap_ms: u64,
    /// Default timeout for post-click navigation/network waits.
    pub nav_wait_ms: u64,
    /// Poll interval for the cooperative pause flag.
    pub pause_poll_ms: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_foreach_concurrency: 8,
            wait_cap_ms: 120_000,
            nav_wait_ms: 10_000,
            pause_poll_ms: 100,
        }
    }
}

/// Control-flow interpreter result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Ok,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of one run, including partial progress on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: RunId,
    pub flow_id: FlowId,
    pub success: bool,
    pub summary: RunSummary,
    pub logs: Vec<RunLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
