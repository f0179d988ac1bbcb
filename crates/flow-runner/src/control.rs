//! Control-flow interpreter: foreach / while directives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use flow_model::Flow;
use node_registry::{ControlDirective, ExecCtx, StepError};

use crate::errors::RunnerError;
use crate::runner::FlowRunner;
use crate::types::ControlStatus;

/// Which node/edge set of a flow is being executed.
#[derive(Debug, Clone)]
pub(crate) enum GraphScope {
    Main,
    Subflow(String),
}

impl FlowRunner {
    /// Interpret a control directive returned by a node handler.
    ///
    /// Unknown directive kinds are a no-op: directives are additive and
    /// must never hard-fail a flow that predates a newer kind.
    pub(crate) async fn run_control(
        self: Arc<Self>,
        flow: Arc<Flow>,
        node_id: String,
        directive: ControlDirective,
        ctx: Arc<ExecCtx>,
    ) -> Result<ControlStatus, RunnerError> {
        match directive {
            ControlDirective::Foreach {
                list_var,
                item_var,
                subflow_id,
                concurrency,
            } => {
                self.run_foreach(
                    flow,
                    &node_id,
                    &list_var,
                    &item_var,
                    &subflow_id,
                    concurrency,
                    ctx,
                )
                .await
            }
            ControlDirective::While {
                condition,
                subflow_id,
                max_iterations,
            } => {
                self.run_while(flow, &node_id, &condition, &subflow_id, max_iterations, ctx)
                    .await
            }
            ControlDirective::Other(kind) => {
                debug!(kind, "unknown control directive; ignoring");
                Ok(ControlStatus::Ok)
            }
        }
    }

    /// Iterate a subflow over a list variable.
    ///
    /// Sequential when `concurrency <= 1`; otherwise a bounded worker pool
    /// pulls items off a shared cursor. Each parallel branch gets a
    /// shallow clone of the variable map, so its scalar `item_var` cannot
    /// be corrupted by siblings, and its writes do not merge back. The
    /// pause flag is polled cooperatively after every item; progress
    /// survives in a cursor variable so a paused directive resumes where
    /// it left off.
    #[allow(clippy::too_many_arguments)]
    async fn run_foreach(
        self: Arc<Self>,
        flow: Arc<Flow>,
        node_id: &str,
        list_var: &str,
        item_var: &str,
        subflow_id: &str,
        concurrency: u32,
        ctx: Arc<ExecCtx>,
    ) -> Result<ControlStatus, RunnerError> {
        let items: Vec<Value> = match ctx.get_var(list_var) {
            Some(Value::Array(items)) => items,
            _ => return Err(RunnerError::NotAList(list_var.to_string())),
        };

        let cursor_key = format!("__cursor_{node_id}");
        let start = ctx
            .get_var(&cursor_key)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        if concurrency <= 1 {
            for idx in start..items.len() {
                if ctx.flags.is_terminated() {
                    return Err(RunnerError::Canceled);
                }
                ctx.set_var(item_var.to_string(), items[idx].clone());
                self.clone()
                    .execute_graph(
                        flow.clone(),
                        GraphScope::Subflow(subflow_id.to_string()),
                        ctx.clone(),
                    )
                    .await?;
                ctx.set_var(cursor_key.clone(), json!(idx + 1));
                if ctx.flags.is_paused() {
                    debug!(node_id, processed = idx + 1, "foreach paused");
                    return Ok(ControlStatus::Paused);
                }
            }
            ctx.set_var(cursor_key, json!(0));
            return Ok(ControlStatus::Ok);
        }

        // bounded fan-out: never more workers than the engine maximum or
        // the remaining items
        let remaining = items.len().saturating_sub(start);
        let workers = self
            .limits()
            .max_foreach_concurrency
            .min(concurrency as usize)
            .min(remaining)
            .max(1);
        debug!(node_id, workers, items = items.len(), "foreach fan-out");

        let cursor = Arc::new(AtomicUsize::new(start));
        let items = Arc::new(items);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let runner = Arc::clone(&self);
            let flow = Arc::clone(&flow);
            let parent = Arc::clone(&ctx);
            let cursor = Arc::clone(&cursor);
            let items = Arc::clone(&items);
            let item_var = item_var.to_string();
            let subflow_id = subflow_id.to_string();

            handles.push(tokio::spawn(async move {
                loop {
                    if parent.flags.is_terminated() {
                        return Err(RunnerError::Canceled);
                    }
                    // pause is cooperative: stop pulling, finish the pool
                    if parent.flags.is_paused() {
                        return Ok(());
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= items.len() {
                        return Ok(());
                    }

                    let branch = Arc::new(parent.clone_for_branch());
                    branch.set_var(item_var.clone(), items[idx].clone());
                    runner
                        .clone()
                        .execute_graph(
                            flow.clone(),
                            GraphScope::Subflow(subflow_id.clone()),
                            branch,
                        )
                        .await?;
                }
            }));
        }

        // all workers are awaited; pause never preempts an item mid-flight
        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    warn!(%join_err, "foreach worker panicked");
                    if first_error.is_none() {
                        first_error = Some(RunnerError::Step {
                            node_id: node_id.to_string(),
                            source: StepError::Executor("foreach worker panicked".into()),
                        });
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let taken = cursor.load(Ordering::SeqCst).min(items.len());
        if ctx.flags.is_paused() && taken < items.len() {
            ctx.set_var(cursor_key, json!(taken));
            return Ok(ControlStatus::Paused);
        }
        ctx.set_var(cursor_key, json!(0));
        Ok(ControlStatus::Ok)
    }

    /// Re-evaluate a condition before each iteration, up to a hard cap.
    /// Reaching the cap is not an error: it defends against infinite loops
    /// from a mis-recorded or hand-edited condition.
    async fn run_while(
        self: Arc<Self>,
        flow: Arc<Flow>,
        node_id: &str,
        condition: &str,
        subflow_id: &str,
        max_iterations: u32,
        ctx: Arc<ExecCtx>,
    ) -> Result<ControlStatus, RunnerError> {
        for iteration in 0..max_iterations {
            if ctx.flags.is_terminated() {
                return Err(RunnerError::Canceled);
            }

            let vars = ctx.vars_snapshot();
            let proceed = self
                .registry()
                .evaluator()
                .evaluate_bool(condition, &vars)
                .map_err(|err| RunnerError::Step {
                    node_id: node_id.to_string(),
                    source: StepError::Validation(vec![err.to_string()]),
                })?;
            if !proceed {
                debug!(node_id, iteration, "while condition false; exiting loop");
                return Ok(ControlStatus::Ok);
            }

            self.clone()
                .execute_graph(
                    flow.clone(),
                    GraphScope::Subflow(subflow_id.to_string()),
                    ctx.clone(),
                )
                .await?;

            if ctx.flags.is_paused() {
                debug!(node_id, iteration, "while paused");
                return Ok(ControlStatus::Paused);
            }
        }
        warn!(node_id, max_iterations, "while reached iteration cap");
        Ok(ControlStatus::Ok)
    }
}
