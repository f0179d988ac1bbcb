//! Logic handlers: assert, http, extract-adjacent script, conditionals and
//! loop directives.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use executor_api::ToolName;
use flow_model::{Assertion, FailStrategy, Node, NodeConfig, DEFAULT_LABEL};
use flow_expr::var_equals;

use crate::ctx::{ExecCtx, RunLogEntry, RunStatus};
use crate::errors::{StepError, ValidationResult};
use crate::handlers::{check_output, mismatch, require_target, resolve_target, Deps, StepHandler};
use crate::outcome::{ControlDirective, StepOutcome};

fn expr_error(err: flow_expr::ExprError) -> StepError {
    // expression problems are structural, never retried
    StepError::Validation(vec![err.to_string()])
}

pub(crate) struct AssertHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for AssertHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Assert(cfg) => match &cfg.assertion {
                Assertion::ElementExists | Assertion::ElementVisible => {
                    v.require(cfg.target.is_some(), "target required for element assertion");
                    if let Some(target) = &cfg.target {
                        require_target(&mut v, target);
                    }
                }
                Assertion::TextContains { value } => {
                    v.require(cfg.target.is_some(), "target required for text assertion");
                    v.require(!value.is_empty(), "expected text required");
                }
                Assertion::Expression { expression } => {
                    v.require(!expression.trim().is_empty(), "expression required");
                }
            },
            _ => v.require(false, "assert config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Assert(cfg) = &node.config else {
            return Err(mismatch(node));
        };

        let failure: Option<String> = match &cfg.assertion {
            Assertion::ElementExists | Assertion::ElementVisible => {
                let Some(target) = cfg.target.as_ref() else {
                    return Err(StepError::Validation(vec![
                        "target required for element assertion".into(),
                    ]));
                };
                match self
                    .deps
                    .locator
                    .locate(ctx.tab(), target, Some(ctx.frame()))
                    .await
                {
                    Some(_) => None,
                    None => Some(match cfg.assertion {
                        Assertion::ElementVisible => "element not visible".into(),
                        _ => "element not found".into(),
                    }),
                }
            }
            Assertion::TextContains { value } => {
                let Some(target) = cfg.target.as_ref() else {
                    return Err(StepError::Validation(vec![
                        "target required for text assertion".into(),
                    ]));
                };
                let resolved = resolve_target(&self.deps, ctx, target).await?;
                let text = self
                    .deps
                    .locator
                    .bridge()
                    .read_attribute(ctx.tab(), resolved.frame_id, &resolved.ref_id, None)
                    .await
                    .map_err(|e| StepError::Executor(e.to_string()))?
                    .unwrap_or_default();
                if text.contains(value.as_str()) {
                    None
                } else {
                    Some(format!("text does not contain '{value}'"))
                }
            }
            Assertion::Expression { expression } => {
                let vars = ctx.vars_snapshot();
                if self
                    .deps
                    .evaluator
                    .evaluate_bool(expression, &vars)
                    .map_err(expr_error)?
                {
                    None
                } else {
                    Some(format!("expression is false: {expression}"))
                }
            }
        };

        match failure {
            None => Ok(StepOutcome::Done),
            Some(message) => match cfg.fail_strategy {
                FailStrategy::Stop => Err(StepError::Assertion(message)),
                FailStrategy::Warn => {
                    warn!(node = %node.id, %message, "assertion failed; continuing (warn strategy)");
                    ctx.logger.log(RunLogEntry::new(
                        node.id.clone(),
                        RunStatus::Warning,
                        format!("assertion failed: {message}"),
                    ));
                    Ok(StepOutcome::Warned)
                }
            },
        }
    }
}

pub(crate) struct HttpHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for HttpHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Http(cfg) => {
                v.require(!cfg.method.is_empty(), "method required");
                v.require(!cfg.url.is_empty(), "url required");
            }
            _ => v.require(false, "http config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Http(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                ctx.frame(),
                ToolName::HttpRequest,
                json!({
                    "method": cfg.method,
                    "url": cfg.url,
                    "headers": cfg.headers,
                    "body": cfg.body,
                }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        let output = check_output(output)?;

        if let Some(save_as) = &cfg.save_as {
            let value = output
                .json()
                .or_else(|| output.text().map(|t| Value::String(t.to_string())))
                .unwrap_or(Value::Null);
            ctx.set_var(save_as.clone(), value);
        }
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct ScriptHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for ScriptHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Script(cfg) => v.require(!cfg.code.trim().is_empty(), "code required"),
            _ => v.require(false, "script config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Script(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        if cfg.run_after {
            return Ok(StepOutcome::DeferAfterScript(cfg.clone()));
        }

        let arg = Value::Object(ctx.vars_snapshot().into_iter().collect());
        let result = self
            .deps
            .locator
            .bridge()
            .eval_script(ctx.tab(), ctx.frame(), &cfg.code, arg)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;

        if let Some(save_as) = &cfg.save_as {
            ctx.set_var(save_as.clone(), result);
        }
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct IfHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for IfHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::If(cfg) => {
                let has_modern = cfg.branches.as_ref().is_some_and(|b| !b.is_empty());
                let has_legacy = cfg.expression.is_some() || cfg.var.is_some();
                v.require(
                    has_modern || has_legacy,
                    "branches or a legacy condition required",
                );
                if let Some(branches) = &cfg.branches {
                    for branch in branches {
                        v.require(!branch.label.is_empty(), "branch label required");
                        v.require(
                            !branch.expression.trim().is_empty(),
                            "branch expression required",
                        );
                    }
                }
            }
            _ => v.require(false, "if config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::If(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let vars = ctx.vars_snapshot();

        // modern form: first true branch wins, else the explicit else
        // label, else the default edge
        if let Some(branches) = cfg.branches.as_ref().filter(|b| !b.is_empty()) {
            for branch in branches {
                if self
                    .deps
                    .evaluator
                    .evaluate_bool(&branch.expression, &vars)
                    .map_err(expr_error)?
                {
                    return Ok(StepOutcome::Branch(branch.label.clone()));
                }
            }
            let label = cfg
                .else_label
                .clone()
                .unwrap_or_else(|| DEFAULT_LABEL.to_string());
            return Ok(StepOutcome::Branch(label));
        }

        // legacy single condition yields boolean branch "true"/"false"
        let decision = if let Some(expression) = &cfg.expression {
            self.deps
                .evaluator
                .evaluate_bool(expression, &vars)
                .map_err(expr_error)?
        } else if let Some(var) = &cfg.var {
            let expected = cfg.equals.clone().unwrap_or(Value::Null);
            var_equals(&vars, var, &expected)
        } else {
            return Err(StepError::Validation(vec![
                "branches or a legacy condition required".into(),
            ]));
        };
        Ok(StepOutcome::Branch(
            if decision { "true" } else { "false" }.to_string(),
        ))
    }
}

pub(crate) struct ForeachHandler;

#[async_trait]
impl StepHandler for ForeachHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Foreach(cfg) => {
                v.require(!cfg.list_var.is_empty(), "listVar required");
                v.require(!cfg.item_var.is_empty(), "itemVar required");
                v.require(!cfg.subflow_id.is_empty(), "subflowId required");
                v.require(cfg.concurrency >= 1, "concurrency must be at least 1");
            }
            _ => v.require(false, "foreach config required"),
        }
        v
    }

    async fn run(&self, _ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Foreach(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        Ok(StepOutcome::Control(ControlDirective::Foreach {
            list_var: cfg.list_var.clone(),
            item_var: cfg.item_var.clone(),
            subflow_id: cfg.subflow_id.clone(),
            concurrency: cfg.concurrency,
        }))
    }
}

pub(crate) struct WhileHandler;

#[async_trait]
impl StepHandler for WhileHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::While(cfg) => {
                v.require(!cfg.condition.trim().is_empty(), "condition required");
                v.require(!cfg.subflow_id.is_empty(), "subflowId required");
                v.require(cfg.max_iterations >= 1, "maxIterations must be at least 1");
            }
            _ => v.require(false, "while config required"),
        }
        v
    }

    async fn run(&self, _ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::While(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        Ok(StepOutcome::Control(ControlDirective::While {
            condition: cfg.condition.clone(),
            subflow_id: cfg.subflow_id.clone(),
            max_iterations: cfg.max_iterations,
        }))
    }
}

pub(crate) struct ExecuteFlowHandler;

#[async_trait]
impl StepHandler for ExecuteFlowHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::ExecuteFlow(cfg) => v.require(
                cfg.subflow_id.is_some() || cfg.flow_id.is_some(),
                "subflowId or flowId required",
            ),
            _ => v.require(false, "executeFlow config required"),
        }
        v
    }

    async fn run(&self, _ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::ExecuteFlow(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        Ok(StepOutcome::RunSubflow(cfg.clone()))
    }
}

/// loopElements queries matching elements fresh, parks their refs in a
/// synthetic list variable and reuses the foreach machinery.
pub(crate) struct LoopElementsHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for LoopElementsHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::LoopElements(cfg) => {
                v.require(!cfg.selector.is_empty(), "selector required");
                v.require(!cfg.item_var.is_empty(), "itemVar required");
                v.require(!cfg.subflow_id.is_empty(), "subflowId required");
                v.require(cfg.concurrency >= 1, "concurrency must be at least 1");
            }
            _ => v.require(false, "loopElements config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::LoopElements(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let handles = self
            .deps
            .locator
            .bridge()
            .query_all(ctx.tab(), ctx.frame(), &cfg.selector)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;

        let list_var = format!("__elements_{}", node.id);
        let refs: Vec<Value> = handles
            .into_iter()
            .map(|h| Value::String(h.ref_id))
            .collect();
        ctx.set_var(list_var.clone(), Value::Array(refs));

        Ok(StepOutcome::Control(ControlDirective::Foreach {
            list_var,
            item_var: cfg.item_var.clone(),
            subflow_id: cfg.subflow_id.clone(),
            concurrency: cfg.concurrency,
        }))
    }
}
