//! Engine wiring and control surfaces.
//!
//! Control-surface calls never throw: they return structured
//! `{success, error}` results so a thin view layer can render them
//! directly. One recording session and one replay run are active at a
//! time per engine instance.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use element_locator::FrameBridge;
use executor_api::ActionExecutor;
use flow_model::Flow;
use flow_runner::{FlowRunner, RunResult};
use flow_store::{FlowStore, FlowSummary, InMemoryFlowStore};
use node_registry::{ExecCtx, Registry};
use recording_session::{CapturedStep, RecordingSession, TabChannel};
use reflow_core_types::{FlowId, RunId, TabId};
use run_events::{EventBus, EventQuery, InMemoryEventsStore, RunEvent, Subscription};

use crate::config::EngineConfig;

/// Structured result for control-surface operations.
#[derive(Debug, Clone, Default)]
pub struct OpResult {
    pub success: bool,
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Result of `stop_recording`. `success` stays true even when the stop
/// barrier partially failed: the flow is still saved, only the
/// diagnostic differs.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub flow: Option<Flow>,
}

pub struct Engine {
    session: Arc<RecordingSession>,
    runner: Arc<FlowRunner>,
    flows: Arc<dyn FlowStore>,
    bus: Arc<EventBus>,
    active_runs: Arc<DashMap<RunId, Arc<ExecCtx>>>,
    active_run_id: Arc<Mutex<Option<RunId>>>,
    results: Arc<DashMap<RunId, RunResult>>,
}

impl Engine {
    /// Wire an engine from its external capabilities.
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        bridge: Arc<dyn FrameBridge>,
        tab_channel: Arc<dyn TabChannel>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new(executor, bridge, config.limits.wait_cap_ms));
        let bus = Arc::new(EventBus::new(Arc::new(InMemoryEventsStore::new())));
        let flows: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let runner = FlowRunner::new(registry, bus.clone(), flows.clone(), config.limits);
        let session = Arc::new(RecordingSession::new(tab_channel, config.barrier));

        Arc::new(Self {
            session,
            runner,
            flows,
            bus,
            active_runs: Arc::new(DashMap::new()),
            active_run_id: Arc::new(Mutex::new(None)),
            results: Arc::new(DashMap::new()),
        })
    }

    pub fn flows(&self) -> &Arc<dyn FlowStore> {
        &self.flows
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn session(&self) -> &Arc<RecordingSession> {
        &self.session
    }

    // ---- recording control surface -------------------------------------

    pub async fn start_recording(&self, name: &str, origin_tab: TabId) -> OpResult {
        match self.session.start_session(name, origin_tab).await {
            Ok(()) => OpResult::ok(),
            Err(err) => OpResult::fail(err.to_string()),
        }
    }

    pub async fn pause_recording(&self) -> OpResult {
        match self.session.pause().await {
            Ok(()) => OpResult::ok(),
            Err(err) => OpResult::fail(err.to_string()),
        }
    }

    pub async fn resume_recording(&self) -> OpResult {
        match self.session.resume().await {
            Ok(()) => OpResult::ok(),
            Err(err) => OpResult::fail(err.to_string()),
        }
    }

    /// Forward captured steps from the capture boundary into the session.
    pub async fn append_captured(&self, steps: Vec<CapturedStep>) -> OpResult {
        match self.session.append_steps(steps).await {
            Ok(()) => OpResult::ok(),
            Err(err) => OpResult::fail(err.to_string()),
        }
    }

    /// Stop the recording, run the stop barrier, persist the flow.
    pub async fn stop_recording(&self) -> StopOutcome {
        let (flow, report) = match self.session.stop().await {
            Ok(parts) => parts,
            Err(err) => {
                return StopOutcome {
                    success: false,
                    error: Some(err.to_string()),
                    flow: None,
                }
            }
        };

        let barrier_error = (!report.ok).then(|| {
            let tabs: Vec<String> = report
                .failures
                .iter()
                .map(|f| f.tab.to_string())
                .collect();
            format!(
                "recording saved, but some tabs did not acknowledge stop: {}",
                tabs.join(", ")
            )
        });

        if let Err(err) = self.flows.save(flow.clone()).await {
            warn!(%err, "flow save failed after recording stop");
            return StopOutcome {
                success: false,
                error: Some(err.to_string()),
                flow: Some(flow),
            };
        }

        info!(flow = %flow.id, barrier_ok = report.ok, "recording stopped and saved");
        StopOutcome {
            success: true,
            error: barrier_error,
            flow: Some(flow),
        }
    }

    // ---- replay control surface ----------------------------------------

    /// Start a run of a stored flow. One run is active at a time.
    pub async fn enqueue_run(
        &self,
        flow_id: &FlowId,
        vars: HashMap<String, Value>,
    ) -> Result<RunId, OpResult> {
        {
            let active = self.active_run_id.lock();
            if let Some(running) = active.as_ref() {
                return Err(OpResult::fail(format!(
                    "a run is already active: {running}"
                )));
            }
        }

        let flow = match self.flows.get(flow_id).await {
            Ok(flow) => Arc::new(flow),
            Err(err) => return Err(OpResult::fail(err.to_string())),
        };

        for def in &flow.variables {
            if let Some(value) = vars.get(&def.key) {
                if let Err(message) = def.check(value) {
                    return Err(OpResult::fail(message));
                }
            }
        }

        let run_id = RunId::new();
        let ctx = Arc::new(
            ExecCtx::new(run_id.clone(), flow.id.clone(), TabId(1)).with_vars(vars),
        );
        self.active_runs.insert(run_id.clone(), ctx.clone());
        *self.active_run_id.lock() = Some(run_id.clone());

        let runner = self.runner.clone();
        let results = Arc::clone(&self.results);
        let active_runs = Arc::clone(&self.active_runs);
        let active_run_id = Arc::clone(&self.active_run_id);
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            let result = runner.run_flow(flow, ctx).await;
            results.insert(spawned_run_id.clone(), result);
            active_runs.remove(&spawned_run_id);
            let mut active = active_run_id.lock();
            if active.as_ref() == Some(&spawned_run_id) {
                *active = None;
            }
        });

        Ok(run_id)
    }

    /// Run a flow to completion in the caller's task (CLI path).
    pub async fn run_flow_blocking(
        &self,
        flow: Flow,
        vars: HashMap<String, Value>,
    ) -> RunResult {
        let run_id = RunId::new();
        let ctx = Arc::new(
            ExecCtx::new(run_id.clone(), flow.id.clone(), TabId(1)).with_vars(vars),
        );
        self.active_runs.insert(run_id.clone(), ctx.clone());
        let result = self.runner.clone().run_flow(Arc::new(flow), ctx).await;
        self.active_runs.remove(&run_id);
        self.results.insert(run_id, result.clone());
        result
    }

    pub fn cancel_run(&self, run_id: &RunId) -> OpResult {
        match self.active_runs.get(run_id) {
            Some(ctx) => {
                ctx.flags.cancel();
                OpResult::ok()
            }
            None => OpResult::fail(format!("no active run: {run_id}")),
        }
    }

    pub fn pause_run(&self, run_id: &RunId) -> OpResult {
        match self.active_runs.get(run_id) {
            Some(ctx) => {
                ctx.flags.pause();
                OpResult::ok()
            }
            None => OpResult::fail(format!("no active run: {run_id}")),
        }
    }

    pub fn resume_run(&self, run_id: &RunId) -> OpResult {
        match self.active_runs.get(run_id) {
            Some(ctx) => {
                ctx.flags.unpause();
                OpResult::ok()
            }
            None => OpResult::fail(format!("no active run: {run_id}")),
        }
    }

    /// Subscribe to run events filtered by run id.
    pub fn subscribe_run(
        &self,
        run_id: &RunId,
    ) -> (mpsc::UnboundedReceiver<RunEvent>, Subscription) {
        self.bus.subscribe_channel(Some(run_id.clone()))
    }

    pub async fn run_events(&self, run_id: &RunId) -> Vec<RunEvent> {
        self.bus
            .list(EventQuery::for_run(run_id.clone()))
            .await
            .unwrap_or_default()
    }

    pub fn run_result(&self, run_id: &RunId) -> Option<RunResult> {
        self.results.get(run_id).map(|r| r.clone())
    }

    pub async fn list_flows(&self) -> Vec<FlowSummary> {
        self.flows.list().await.unwrap_or_default()
    }
}
