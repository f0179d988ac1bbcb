//! Sequential graph execution with retry and branch dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::json;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use executor_api::ToolName;
use flow_model::{
    topological_order, Edge, Flow, Node, NodeConfig, WaitAfterKind, DEFAULT_LABEL,
};
use flow_store::FlowStore;
use node_registry::{ExecCtx, Registry, RunLogEntry, RunStatus, StepOutcome};
use run_events::{EventBus, NewRunEvent, RunEventKind};

use crate::control::GraphScope;
use crate::errors::RunnerError;
use crate::types::{ControlStatus, EngineLimits, RunResult, RunSummary};

/// Where execution resumes after a node completes.
enum NextStep {
    Continue,
    Jump(String),
}

pub struct FlowRunner {
    registry: Arc<Registry>,
    bus: Arc<EventBus>,
    store: Arc<dyn FlowStore>,
    limits: EngineLimits,
}

impl FlowRunner {
    pub fn new(
        registry: Arc<Registry>,
        bus: Arc<EventBus>,
        store: Arc<dyn FlowStore>,
        limits: EngineLimits,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            store,
            limits,
        })
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Execute a flow to completion. The flow itself is read-only; the
    /// context carries all runtime state.
    pub async fn run_flow(self: Arc<Self>, flow: Arc<Flow>, ctx: Arc<ExecCtx>) -> RunResult {
        info!(flow = %flow.id, run = %ctx.run_id, "run started");
        seed_variable_defaults(&flow, &ctx);
        self.publish(&ctx, RunEventKind::RunStarted, None).await;

        let result = self
            .clone()
            .execute_graph(flow.clone(), GraphScope::Main, ctx.clone())
            .await;

        // scripts marked "run after" execute once the graph is done
        for script in ctx.take_deferred_scripts() {
            if let Err(err) = self.registry.run_deferred_script(&ctx, &script).await {
                warn!(%err, "deferred script failed");
                ctx.logger.log(RunLogEntry::new(
                    "deferred-script",
                    RunStatus::Warning,
                    format!("deferred script failed: {err}"),
                ));
            }
        }

        let logs = ctx.logger.entries();
        let summary = summarize(&logs);
        let (success, error, terminal) = match &result {
            Ok(()) => (true, None, RunEventKind::RunSucceeded),
            Err(RunnerError::Canceled) => (
                false,
                Some("run canceled".to_string()),
                RunEventKind::RunCanceled,
            ),
            Err(err) => (false, Some(err.to_string()), RunEventKind::RunFailed),
        };
        self.publish(&ctx, terminal, None).await;
        info!(run = %ctx.run_id, success, "run finished");

        RunResult {
            run_id: ctx.run_id.clone(),
            flow_id: flow.id.clone(),
            success,
            summary,
            logs,
            error,
        }
    }

    /// Execute the nodes of one graph scope in topological order along
    /// default edges, dispatching branches via labelled edges on demand.
    #[async_recursion]
    pub(crate) async fn execute_graph(
        self: Arc<Self>,
        flow: Arc<Flow>,
        scope: GraphScope,
        ctx: Arc<ExecCtx>,
    ) -> Result<(), RunnerError> {
        let (nodes, edges): (&[Node], &[Edge]) = match &scope {
            GraphScope::Main => (&flow.nodes, &flow.edges),
            GraphScope::Subflow(id) => {
                let sub = flow
                    .subflow(id)
                    .ok_or_else(|| RunnerError::UnknownSubflow(id.clone()))?;
                (&sub.nodes, &sub.edges)
            }
        };

        let order = topological_order(nodes, edges)?;
        let positions: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut i = 0;
        while i < order.len() {
            let node = order[i];
            if node.disabled {
                debug!(id = %node.id, "skipping disabled node");
                i += 1;
                continue;
            }

            match self
                .clone()
                .execute_node(flow.clone(), node, edges, ctx.clone())
                .await?
            {
                NextStep::Continue => i += 1,
                NextStep::Jump(target) => match positions.get(target.as_str()) {
                    Some(&idx) => i = idx,
                    None => {
                        return Err(RunnerError::Model(flow_model::ModelError::UnknownNode(
                            target,
                        )))
                    }
                },
            }
        }
        Ok(())
    }

    /// Run one node with its declared retry policy.
    async fn execute_node(
        self: Arc<Self>,
        flow: Arc<Flow>,
        node: &Node,
        edges: &[Edge],
        ctx: Arc<ExecCtx>,
    ) -> Result<NextStep, RunnerError> {
        self.wait_if_paused(&ctx).await?;
        if ctx.flags.is_terminated() {
            return Err(RunnerError::Canceled);
        }

        self.publish(&ctx, RunEventKind::NodeStarted, Some(&node.id))
            .await;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // pre-execution tab state, for navigation-completion comparison
            let pre_state = self.registry.executor().tab_state(ctx.tab()).await.ok();

            match self.registry.execute_step(&ctx, node).await {
                Ok(outcome) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    return self
                        .clone()
                        .handle_outcome(flow, node, edges, outcome, pre_state, elapsed, ctx)
                        .await;
                }
                Err(node_registry::StepError::Canceled) => {
                    return Err(RunnerError::Canceled);
                }
                Err(err) => {
                    let retry = node.retry.filter(|_| err.is_retryable());
                    if let Some(retry) = retry {
                        if attempt <= retry.count {
                            let delay = retry.delay_ms(attempt);
                            warn!(
                                id = %node.id,
                                attempt,
                                delay_ms = delay,
                                %err,
                                "step failed; retrying"
                            );
                            ctx.logger.log(RunLogEntry::new(
                                node.id.clone(),
                                RunStatus::Retrying,
                                format!("attempt {attempt} failed: {err}; retrying in {delay}ms"),
                            ));
                            tokio::select! {
                                _ = sleep(Duration::from_millis(delay)) => {}
                                _ = ctx.flags.cancel_token().cancelled() => {
                                    return Err(RunnerError::Canceled)
                                }
                            }
                            continue;
                        }
                    }

                    // retries exhausted: log with the original error message
                    let mut entry =
                        RunLogEntry::new(node.id.clone(), RunStatus::Failed, err.to_string())
                            .with_duration(started.elapsed().as_millis() as u64);
                    if let Some(data) = self.capture_failure_screenshot(&ctx).await {
                        entry = entry.with_screenshot(data);
                        self.publish_artifact(&ctx, "screenshot", &node.id).await;
                    }
                    ctx.logger.log(entry);
                    self.publish(&ctx, RunEventKind::NodeFailed, Some(&node.id))
                        .await;
                    return Err(RunnerError::Step {
                        node_id: node.id.clone(),
                        source: err,
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_outcome(
        self: Arc<Self>,
        flow: Arc<Flow>,
        node: &Node,
        edges: &[Edge],
        outcome: StepOutcome,
        pre_state: Option<executor_api::TabState>,
        elapsed_ms: u64,
        ctx: Arc<ExecCtx>,
    ) -> Result<NextStep, RunnerError> {
        match outcome {
            StepOutcome::Done => {
                self.after_step_waits(node, pre_state, &ctx).await;
                self.log_success(&ctx, node, elapsed_ms, "ok");
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                Ok(NextStep::Continue)
            }
            StepOutcome::Warned => {
                // the handler already wrote the warning entry
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                Ok(NextStep::Continue)
            }
            StepOutcome::Branch(label) => {
                self.log_success(&ctx, node, elapsed_ms, &format!("branch: {label}"));
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                let edge = edges
                    .iter()
                    .find(|e| e.from == node.id && e.label == label);
                match edge {
                    Some(edge) => Ok(NextStep::Jump(edge.to.clone())),
                    None if label == DEFAULT_LABEL => Ok(NextStep::Continue),
                    None => {
                        debug!(id = %node.id, label, "no edge for branch label; continuing");
                        Ok(NextStep::Continue)
                    }
                }
            }
            StepOutcome::Control(directive) => {
                // a paused control directive resumes once the flag clears
                loop {
                    let status = self
                        .clone()
                        .run_control(flow.clone(), node.id.clone(), directive.clone(), ctx.clone())
                        .await?;
                    match status {
                        ControlStatus::Ok => break,
                        ControlStatus::Paused => self.wait_if_paused(&ctx).await?,
                    }
                }
                self.log_success(&ctx, node, elapsed_ms, "ok");
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                Ok(NextStep::Continue)
            }
            StepOutcome::RunSubflow(cfg) => {
                self.clone().run_subflow_config(flow, &cfg, ctx.clone()).await?;
                self.log_success(&ctx, node, elapsed_ms, "ok");
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                Ok(NextStep::Continue)
            }
            StepOutcome::DeferAfterScript(script) => {
                ctx.defer_script(script);
                self.log_success(&ctx, node, elapsed_ms, "script deferred to end of run");
                self.publish(&ctx, RunEventKind::NodeSucceeded, Some(&node.id))
                    .await;
                Ok(NextStep::Continue)
            }
        }
    }

    /// Recurse into a named subflow or another persisted flow.
    pub(crate) async fn run_subflow_config(
        self: Arc<Self>,
        flow: Arc<Flow>,
        cfg: &flow_model::ExecuteFlowConfig,
        ctx: Arc<ExecCtx>,
    ) -> Result<(), RunnerError> {
        if let Some(subflow_id) = &cfg.subflow_id {
            return self
                .execute_graph(flow, GraphScope::Subflow(subflow_id.clone()), ctx)
                .await;
        }
        if let Some(flow_id) = &cfg.flow_id {
            let loaded = self
                .store
                .get(&reflow_core_types::FlowId(flow_id.clone()))
                .await
                .map_err(|_| RunnerError::FlowNotFound(flow_id.clone()))?;
            let loaded = Arc::new(loaded);
            seed_variable_defaults(&loaded, &ctx);
            return self.execute_graph(loaded, GraphScope::Main, ctx).await;
        }
        Err(RunnerError::UnknownSubflow("<unspecified>".into()))
    }

    /// Optional post-click navigation/network-idle wait, so "this click
    /// navigates" recordings don't need the recorder to guess the exact
    /// wait condition.
    async fn after_step_waits(
        &self,
        node: &Node,
        pre_state: Option<executor_api::TabState>,
        ctx: &ExecCtx,
    ) {
        let (NodeConfig::Click(cfg) | NodeConfig::Dblclick(cfg)) = &node.config else {
            return;
        };
        let Some(wait) = &cfg.wait_after else {
            return;
        };
        let timeout = wait
            .timeout_ms
            .unwrap_or(self.limits.nav_wait_ms)
            .min(self.limits.wait_cap_ms);

        let completed = match wait.condition {
            WaitAfterKind::Navigation => {
                let Some(previous) = pre_state else { return };
                self.registry
                    .executor()
                    .wait_for_navigation(ctx.tab(), &previous, timeout)
                    .await
            }
            WaitAfterKind::NetworkIdle => {
                self.registry
                    .executor()
                    .wait_for_network_idle(ctx.tab(), timeout)
                    .await
            }
        };
        match completed {
            Ok(true) => {}
            Ok(false) => warn!(id = %node.id, "post-click wait timed out; continuing"),
            Err(err) => warn!(id = %node.id, %err, "post-click wait failed; continuing"),
        }
    }

    fn log_success(&self, ctx: &ExecCtx, node: &Node, elapsed_ms: u64, message: &str) {
        let mut entry = RunLogEntry::new(node.id.clone(), RunStatus::Success, message)
            .with_duration(elapsed_ms);
        if let Some(fallback) = ctx.take_fallback() {
            entry = entry.with_fallback(fallback);
        }
        ctx.logger.log(entry);
    }

    /// Best-effort failure screenshot for the run log.
    async fn capture_failure_screenshot(&self, ctx: &ExecCtx) -> Option<String> {
        let output = self
            .registry
            .executor()
            .execute(
                ctx.tab(),
                ctx.frame(),
                ToolName::Screenshot,
                json!({ "fullPage": false }),
            )
            .await
            .ok()?;
        if output.is_error {
            return None;
        }
        output.image().map(|data| data.to_string())
    }

    pub(crate) async fn wait_if_paused(&self, ctx: &ExecCtx) -> Result<(), RunnerError> {
        while ctx.flags.is_paused() {
            if ctx.flags.is_terminated() {
                return Err(RunnerError::Canceled);
            }
            tokio::select! {
                _ = sleep(Duration::from_millis(self.limits.pause_poll_ms)) => {}
                _ = ctx.flags.cancel_token().cancelled() => return Err(RunnerError::Canceled),
            }
        }
        Ok(())
    }

    pub(crate) async fn publish(&self, ctx: &ExecCtx, kind: RunEventKind, node_id: Option<&str>) {
        let input = match node_id {
            Some(id) => NewRunEvent::node(ctx.run_id.clone(), kind, id),
            None => NewRunEvent::run(ctx.run_id.clone(), kind),
        };
        if let Err(err) = self.bus.append(input).await {
            warn!(%err, "event publish failed");
        }
    }

    async fn publish_artifact(&self, ctx: &ExecCtx, kind: &str, node_id: &str) {
        self.publish(
            ctx,
            RunEventKind::Artifact(kind.to_string()),
            Some(node_id),
        )
        .await;
    }
}

fn seed_variable_defaults(flow: &Flow, ctx: &ExecCtx) {
    for var in &flow.variables {
        if ctx.get_var(&var.key).is_none() {
            if let Some(default) = &var.default {
                ctx.set_var(var.key.clone(), default.clone());
            }
        }
    }
}

fn summarize(logs: &[RunLogEntry]) -> RunSummary {
    let mut summary = RunSummary::default();
    for entry in logs {
        match entry.status {
            RunStatus::Success | RunStatus::Warning => {
                summary.attempted += 1;
                summary.succeeded += 1;
            }
            RunStatus::Failed => {
                summary.attempted += 1;
                summary.failed += 1;
            }
            RunStatus::Retrying => {}
        }
    }
    summary
}
