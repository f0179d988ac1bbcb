//! Per-run execution context and the run logger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use element_locator::FallbackReport;
use flow_model::ScriptConfig;
use reflow_core_types::{FlowId, FrameId, RunId, TabId};

/// Cooperative pause/cancel flags shared across a run.
///
/// Cancellation is cooperative: checked between steps and inside long
/// waits, never preemptive mid-operation.
#[derive(Default)]
pub struct ControlFlags {
    cancel: CancellationToken,
    paused: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Retrying,
    Warning,
}

/// One step-level log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogEntry {
    pub node_id: String,
    pub status: RunStatus,
    pub message: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failure screenshot, when one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// Selector-fallback provenance for the resolving step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReport>,
}

impl RunLogEntry {
    pub fn new(node_id: impl Into<String>, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            message: message.into(),
            at: Utc::now(),
            duration_ms: None,
            screenshot: None,
            fallback: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_screenshot(mut self, data: impl Into<String>) -> Self {
        self.screenshot = Some(data.into());
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackReport) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// Step-level log accumulator for one run; handed off to persistence once
/// on completion.
#[derive(Default)]
pub struct RunLogger {
    entries: Mutex<Vec<RunLogEntry>>,
}

impl RunLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, entry: RunLogEntry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<RunLogEntry> {
        self.entries.lock().clone()
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status == status)
            .count()
    }
}

/// Per-run mutable state threaded through every handler.
pub struct ExecCtx {
    pub run_id: RunId,
    pub flow_id: FlowId,
    pub logger: Arc<RunLogger>,
    pub flags: Arc<ControlFlags>,

    vars: Mutex<HashMap<String, Value>>,
    tab: Mutex<TabId>,
    frame: Mutex<FrameId>,
    pending_fallback: Mutex<Option<FallbackReport>>,
    deferred_scripts: Mutex<Vec<ScriptConfig>>,
}

impl ExecCtx {
    pub fn new(run_id: RunId, flow_id: FlowId, tab: TabId) -> Self {
        Self {
            run_id,
            flow_id,
            logger: Arc::new(RunLogger::new()),
            flags: Arc::new(ControlFlags::new()),
            vars: Mutex::new(HashMap::new()),
            tab: Mutex::new(tab),
            frame: Mutex::new(FrameId::MAIN),
            pending_fallback: Mutex::new(None),
            deferred_scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vars(self, vars: HashMap<String, Value>) -> Self {
        *self.vars.lock() = vars;
        self
    }

    /// Shallow per-branch clone for parallel foreach: the variable map is
    /// copied so the branch's scalar writes stay private, while logger,
    /// flags, and tab/frame scope remain shared. Writes do NOT merge back.
    pub fn clone_for_branch(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            flow_id: self.flow_id.clone(),
            logger: Arc::clone(&self.logger),
            flags: Arc::clone(&self.flags),
            vars: Mutex::new(self.vars.lock().clone()),
            tab: Mutex::new(*self.tab.lock()),
            frame: Mutex::new(*self.frame.lock()),
            pending_fallback: Mutex::new(None),
            deferred_scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn get_var(&self, key: &str) -> Option<Value> {
        self.vars.lock().get(key).cloned()
    }

    pub fn set_var(&self, key: impl Into<String>, value: Value) {
        self.vars.lock().insert(key.into(), value);
    }

    pub fn vars_snapshot(&self) -> HashMap<String, Value> {
        self.vars.lock().clone()
    }

    pub fn tab(&self) -> TabId {
        *self.tab.lock()
    }

    pub fn set_tab(&self, tab: TabId) {
        *self.tab.lock() = tab;
        // a tab switch resets the frame scope
        *self.frame.lock() = FrameId::MAIN;
    }

    pub fn frame(&self) -> FrameId {
        *self.frame.lock()
    }

    pub fn set_frame(&self, frame: FrameId) {
        *self.frame.lock() = frame;
    }

    /// Record selector-fallback provenance for the current step; the
    /// runner attaches it to the step's log entry.
    pub fn note_fallback(&self, report: FallbackReport) {
        if report.fallback_used {
            *self.pending_fallback.lock() = Some(report);
        }
    }

    pub fn take_fallback(&self) -> Option<FallbackReport> {
        self.pending_fallback.lock().take()
    }

    pub fn defer_script(&self, config: ScriptConfig) {
        self.deferred_scripts.lock().push(config);
    }

    pub fn take_deferred_scripts(&self) -> Vec<ScriptConfig> {
        std::mem::take(&mut *self.deferred_scripts.lock())
    }
}
