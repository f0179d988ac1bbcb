//! The ActionExecutor capability: concrete browser-action primitives the
//! engine consumes but does not implement.
//!
//! Node handlers address the executor through a fixed tool catalog with
//! JSON argument objects; `is_error` on the output is the sole failure
//! signal for the action itself. Transport-level problems surface as
//! [`ExecutorError`].

mod errors;
mod types;

#[cfg(feature = "stub")]
mod stub;

pub use errors::ExecutorError;
pub use types::*;

#[cfg(feature = "stub")]
pub use stub::StubExecutor;

use async_trait::async_trait;
use reflow_core_types::{FrameId, TabId};
use serde_json::Value;

/// Port to the browser-action layer.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Invoke one tool against a tab/frame with a JSON args object.
    async fn execute(
        &self,
        tab: TabId,
        frame: FrameId,
        tool: ToolName,
        args: Value,
    ) -> Result<ToolOutput, ExecutorError>;

    /// Current url/load status of a tab, captured by the runner before a
    /// node executes for navigation-completion comparisons.
    async fn tab_state(&self, tab: TabId) -> Result<TabState, ExecutorError>;

    /// Block until the tab has navigated away from `previous` and finished
    /// loading, or the timeout elapses. Returns whether the wait completed.
    async fn wait_for_navigation(
        &self,
        tab: TabId,
        previous: &TabState,
        timeout_ms: u64,
    ) -> Result<bool, ExecutorError>;

    /// Block until the tab's network has gone quiet, or the timeout
    /// elapses. Returns whether the wait completed.
    async fn wait_for_network_idle(&self, tab: TabId, timeout_ms: u64)
        -> Result<bool, ExecutorError>;
}
