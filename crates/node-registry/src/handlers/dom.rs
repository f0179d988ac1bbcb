//! Element-interaction handlers: click, fill, scroll, drag, key,
//! triggerEvent, setAttribute, extract, screenshot.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use executor_api::ToolName;
use flow_model::{Node, NodeConfig, NodeKind};

use crate::ctx::ExecCtx;
use crate::errors::{StepError, ValidationResult};
use crate::handlers::{check_output, mismatch, require_target, resolve_target, Deps, StepHandler};
use crate::outcome::StepOutcome;

pub(crate) struct ClickHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for ClickHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Click(cfg) | NodeConfig::Dblclick(cfg) => {
                require_target(&mut v, &cfg.target)
            }
            _ => v.require(false, "click config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let (NodeConfig::Click(cfg) | NodeConfig::Dblclick(cfg)) = &node.config else {
            return Err(mismatch(node));
        };
        let resolved = resolve_target(&self.deps, ctx, &cfg.target).await?;

        // best-effort focus/scroll-into-view before the click
        let _ = self
            .deps
            .locator
            .bridge()
            .focus_by_ref(ctx.tab(), resolved.frame_id, &resolved.ref_id)
            .await;

        let click_count = if node.kind() == NodeKind::Dblclick { 2 } else { 1 };
        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                resolved.frame_id,
                ToolName::Click,
                json!({
                    "ref": resolved.ref_id,
                    "center": resolved.center,
                    "clickCount": click_count,
                }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct FillHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for FillHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Fill(cfg) => require_target(&mut v, &cfg.target),
            _ => v.require(false, "fill config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Fill(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let resolved = resolve_target(&self.deps, ctx, &cfg.target).await?;

        // file-type inputs switch to an upload action
        let is_file = self
            .deps
            .locator
            .bridge()
            .is_file_input(ctx.tab(), resolved.frame_id, &resolved.ref_id)
            .await
            .unwrap_or(false);

        let (tool, args) = if is_file {
            debug!("fill target is a file input; switching to upload");
            (
                ToolName::FileUpload,
                json!({ "ref": resolved.ref_id, "path": cfg.value }),
            )
        } else {
            (
                ToolName::Fill,
                json!({ "ref": resolved.ref_id, "value": cfg.value }),
            )
        };

        let output = self
            .deps
            .executor
            .execute(ctx.tab(), resolved.frame_id, tool, args)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct ScrollHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for ScrollHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Scroll(cfg) => {
                v.require(
                    cfg.target.is_some() || cfg.dx != 0 || cfg.dy != 0,
                    "scroll needs a target or a delta",
                );
            }
            _ => v.require(false, "scroll config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Scroll(cfg) = &node.config else {
            return Err(mismatch(node));
        };

        let mut args = json!({ "dx": cfg.dx, "dy": cfg.dy });
        let mut frame = ctx.frame();
        if let Some(target) = &cfg.target {
            let resolved = resolve_target(&self.deps, ctx, target).await?;
            args["ref"] = json!(resolved.ref_id);
            frame = resolved.frame_id;
        }

        let output = self
            .deps
            .executor
            .execute(ctx.tab(), frame, ToolName::Scroll, args)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct DragHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for DragHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Drag(cfg) => {
                require_target(&mut v, &cfg.source);
                require_target(&mut v, &cfg.target);
            }
            _ => v.require(false, "drag config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Drag(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let source = resolve_target(&self.deps, ctx, &cfg.source).await?;
        let dest = resolve_target(&self.deps, ctx, &cfg.target).await?;

        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                source.frame_id,
                ToolName::Drag,
                json!({
                    "fromRef": source.ref_id,
                    "toRef": dest.ref_id,
                    "from": source.center,
                    "to": dest.center,
                }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct KeyHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for KeyHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Key(cfg) => v.require(!cfg.keys.is_empty(), "keys required"),
            _ => v.require(false, "key config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Key(cfg) = &node.config else {
            return Err(mismatch(node));
        };

        let mut frame = ctx.frame();
        if let Some(target) = &cfg.target {
            let resolved = resolve_target(&self.deps, ctx, target).await?;
            frame = resolved.frame_id;
            let _ = self
                .deps
                .locator
                .bridge()
                .focus_by_ref(ctx.tab(), frame, &resolved.ref_id)
                .await;
        }

        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                frame,
                ToolName::Keyboard,
                json!({ "keys": cfg.keys }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct TriggerEventHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for TriggerEventHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::TriggerEvent(cfg) => {
                require_target(&mut v, &cfg.target);
                v.require(!cfg.event.is_empty(), "event name required");
            }
            _ => v.require(false, "triggerEvent config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::TriggerEvent(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let resolved = resolve_target(&self.deps, ctx, &cfg.target).await?;
        self.deps
            .locator
            .bridge()
            .dispatch_event(ctx.tab(), resolved.frame_id, &resolved.ref_id, &cfg.event)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct SetAttributeHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for SetAttributeHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::SetAttribute(cfg) => {
                require_target(&mut v, &cfg.target);
                v.require(!cfg.name.is_empty(), "attribute name required");
            }
            _ => v.require(false, "setAttribute config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::SetAttribute(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let resolved = resolve_target(&self.deps, ctx, &cfg.target).await?;
        self.deps
            .locator
            .bridge()
            .set_attribute(
                ctx.tab(),
                resolved.frame_id,
                &resolved.ref_id,
                &cfg.name,
                &cfg.value,
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct ExtractHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for ExtractHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Extract(cfg) => {
                require_target(&mut v, &cfg.target);
                v.require(!cfg.save_as.is_empty(), "saveAs variable required");
            }
            _ => v.require(false, "extract config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Extract(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let resolved = resolve_target(&self.deps, ctx, &cfg.target).await?;
        let value = self
            .deps
            .locator
            .bridge()
            .read_attribute(
                ctx.tab(),
                resolved.frame_id,
                &resolved.ref_id,
                cfg.attribute.as_deref(),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;

        match value {
            Some(text) => {
                ctx.set_var(cfg.save_as.clone(), serde_json::Value::String(text));
                Ok(StepOutcome::Done)
            }
            None => Err(StepError::Resolution(match &cfg.attribute {
                Some(attr) => format!("attribute '{attr}' not present on element"),
                None => "element has no text content".into(),
            })),
        }
    }
}

pub(crate) struct ScreenshotHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for ScreenshotHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        if !matches!(&node.config, NodeConfig::Screenshot(_)) {
            v.require(false, "screenshot config required");
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Screenshot(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                ctx.frame(),
                ToolName::Screenshot,
                json!({ "fullPage": cfg.full_page }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        let output = check_output(output)?;

        if let (Some(save_as), Some(data)) = (&cfg.save_as, output.image()) {
            ctx.set_var(save_as.clone(), serde_json::Value::String(data.to_string()));
        }
        Ok(StepOutcome::Done)
    }
}
