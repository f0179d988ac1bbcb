//! Step handlers.
//!
//! Shared conventions for DOM-touching handlers: the active tab/frame
//! scope comes from the context, targets resolve through the locator
//! (recording fallback provenance), and the external ActionExecutor's
//! `is_error` flag is translated into a thrown [`StepError`].

mod dom;
mod logic;
mod nav;

pub(crate) use dom::*;
pub(crate) use logic::*;
pub(crate) use nav::*;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use element_locator::{FallbackReport, Locator, Resolved};
use executor_api::{ActionExecutor, ToolOutput};
use flow_expr::ConditionEvaluator;
use flow_model::{Node, TargetLocator};

use crate::ctx::ExecCtx;
use crate::errors::{StepError, ValidationResult};
use crate::outcome::StepOutcome;

/// Shared handler dependencies.
pub(crate) struct Deps {
    pub executor: Arc<dyn ActionExecutor>,
    pub locator: Arc<Locator>,
    pub evaluator: ConditionEvaluator,
    /// Hard cap for any in-step wait.
    pub wait_cap_ms: u64,
}

/// One step kind's runtime contract.
///
/// `validate` is pure: a structural precondition check with no I/O,
/// listing every violation. `run` performs the step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn validate(&self, node: &Node) -> ValidationResult;
    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError>;
}

/// Resolve a target or fail with an actionable resolution error.
/// A fallback hit is logged and noted on the context for the runner.
pub(crate) async fn resolve_target(
    deps: &Deps,
    ctx: &ExecCtx,
    target: &TargetLocator,
) -> Result<Resolved, StepError> {
    match deps.locator.locate(ctx.tab(), target, Some(ctx.frame())).await {
        Some(resolved) => {
            let report = FallbackReport::from_resolution(target, &resolved);
            if report.fallback_used {
                warn!(
                    from = ?report.fallback_from,
                    to = ?report.fallback_to,
                    "selector fallback used; recorded selector has degraded"
                );
                ctx.note_fallback(report);
            }
            Ok(resolved)
        }
        None => Err(StepError::Resolution(
            "element not found or not visible".into(),
        )),
    }
}

/// Translate the executor's in-band failure flag into a step error.
pub(crate) fn check_output(output: ToolOutput) -> Result<ToolOutput, StepError> {
    if output.is_error {
        let message = output.text().unwrap_or("action failed").to_string();
        return Err(StepError::Executor(message));
    }
    Ok(output)
}

pub(crate) fn require_target(v: &mut ValidationResult, target: &TargetLocator) {
    v.require(!target.is_empty(), "target candidates required");
}

pub(crate) fn mismatch(node: &Node) -> StepError {
    StepError::Control(format!("handler mismatch for step type {}", node.kind()))
}
