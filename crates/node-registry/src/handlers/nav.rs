//! Navigation, tab, frame, wait and download handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use executor_api::{TabLoadStatus, ToolName};
use flow_model::{FrameTarget, Node, NodeConfig};
use reflow_core_types::{FrameId, TabId};

use crate::ctx::ExecCtx;
use crate::errors::{StepError, ValidationResult};
use crate::handlers::{check_output, mismatch, Deps, StepHandler};
use crate::outcome::StepOutcome;

const POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

pub(crate) struct NavigateHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for NavigateHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Navigate(cfg) => v.require(!cfg.url.is_empty(), "url required"),
            _ => v.require(false, "navigate config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Navigate(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                FrameId::MAIN,
                ToolName::Navigate,
                json!({ "url": cfg.url }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        check_output(output)?;
        // navigation lands in the main frame
        ctx.set_frame(FrameId::MAIN);
        Ok(StepOutcome::Done)
    }
}

/// openTab / switchTab / closeTab share one handler.
pub(crate) struct TabsHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for TabsHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::OpenTab(_) | NodeConfig::CloseTab(_) => {}
            NodeConfig::SwitchTab(cfg) => v.require(
                cfg.tab_id.is_some() || cfg.index.is_some(),
                "tabId or index required",
            ),
            _ => v.require(false, "tab config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let (tool, args) = match &node.config {
            NodeConfig::OpenTab(cfg) => (ToolName::OpenTab, json!({ "url": cfg.url })),
            NodeConfig::SwitchTab(cfg) => (
                ToolName::SwitchTab,
                json!({ "tabId": cfg.tab_id, "index": cfg.index }),
            ),
            NodeConfig::CloseTab(cfg) => (ToolName::CloseTab, json!({ "tabId": cfg.tab_id })),
            _ => return Err(mismatch(node)),
        };

        let output = self
            .deps
            .executor
            .execute(ctx.tab(), FrameId::MAIN, tool, args)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        let output = check_output(output)?;

        // open/switch report the now-active tab; adopt it as the scope
        if !matches!(&node.config, NodeConfig::CloseTab(_)) {
            if let Some(tab_id) = output.json().and_then(|v| v["tabId"].as_i64()) {
                debug!(tab_id, "tab scope changed");
                ctx.set_tab(TabId(tab_id));
            }
        }
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct SwitchFrameHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for SwitchFrameHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::SwitchFrame(cfg) => {
                if let FrameTarget::Selector { selector } = &cfg.frame {
                    v.require(!selector.is_empty(), "frame selector required");
                }
            }
            _ => v.require(false, "switchFrame config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::SwitchFrame(cfg) = &node.config else {
            return Err(mismatch(node));
        };

        match &cfg.frame {
            // without a frame tree, parent collapses to the main frame
            FrameTarget::Top | FrameTarget::Parent => ctx.set_frame(FrameId::MAIN),
            FrameTarget::Index { index } => ctx.set_frame(FrameId(*index)),
            FrameTarget::Selector { selector } => {
                let bridge = self.deps.locator.bridge();
                let handle = bridge
                    .ensure_ref_for_selector(ctx.tab(), FrameId::MAIN, selector)
                    .await
                    .map_err(|e| StepError::Executor(e.to_string()))?
                    .ok_or_else(|| {
                        StepError::Resolution(format!("frame element not found: {selector}"))
                    })?;
                let src = bridge
                    .read_attribute(ctx.tab(), FrameId::MAIN, &handle.ref_id, Some("src"))
                    .await
                    .map_err(|e| StepError::Executor(e.to_string()))?
                    .ok_or_else(|| {
                        StepError::Resolution(format!("frame element has no src: {selector}"))
                    })?;
                let frame = bridge
                    .frame_for_url(ctx.tab(), &src)
                    .await
                    .map_err(|e| StepError::Executor(e.to_string()))?
                    .ok_or_else(|| {
                        StepError::Resolution(format!("no frame found for url: {src}"))
                    })?;
                ctx.set_frame(frame);
            }
        }
        Ok(StepOutcome::Done)
    }
}

pub(crate) struct WaitHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for WaitHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        match &node.config {
            NodeConfig::Wait(cfg) => {
                let conditions = [
                    cfg.duration_ms.is_some(),
                    cfg.target.is_some(),
                    cfg.url_contains.is_some(),
                ]
                .iter()
                .filter(|c| **c)
                .count();
                v.require(conditions == 1, "exactly one wait condition required");
            }
            _ => v.require(false, "wait config required"),
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::Wait(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let cap = self.deps.wait_cap_ms;
        let cancel = ctx.flags.cancel_token().clone();

        if let Some(duration_ms) = cfg.duration_ms {
            let duration = Duration::from_millis(duration_ms.min(cap));
            tokio::select! {
                _ = sleep(duration) => return Ok(StepOutcome::Done),
                _ = cancel.cancelled() => return Err(StepError::Canceled),
            }
        }

        let timeout_ms = cfg.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS).min(cap);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        if let Some(target) = &cfg.target {
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err(StepError::Canceled);
                }
                if self
                    .deps
                    .locator
                    .locate(ctx.tab(), target, Some(ctx.frame()))
                    .await
                    .is_some()
                {
                    return Ok(StepOutcome::Done);
                }
                tokio::select! {
                    _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                    _ = cancel.cancelled() => return Err(StepError::Canceled),
                }
            }
            return Err(StepError::Resolution(format!(
                "wait timed out after {timeout_ms}ms: element did not appear"
            )));
        }

        if let Some(fragment) = &cfg.url_contains {
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err(StepError::Canceled);
                }
                let state = self
                    .deps
                    .executor
                    .tab_state(ctx.tab())
                    .await
                    .map_err(|e| StepError::Executor(e.to_string()))?;
                if state.status == TabLoadStatus::Complete && state.url.contains(fragment) {
                    return Ok(StepOutcome::Done);
                }
                tokio::select! {
                    _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                    _ = cancel.cancelled() => return Err(StepError::Canceled),
                }
            }
            return Err(StepError::Resolution(format!(
                "wait timed out after {timeout_ms}ms: url never contained '{fragment}'"
            )));
        }

        // validate() guarantees one condition was present
        Err(StepError::Validation(vec![
            "exactly one wait condition required".into(),
        ]))
    }
}

pub(crate) struct DownloadHandler {
    pub deps: Arc<Deps>,
}

#[async_trait]
impl StepHandler for DownloadHandler {
    fn validate(&self, node: &Node) -> ValidationResult {
        let mut v = ValidationResult::ok();
        if !matches!(&node.config, NodeConfig::HandleDownload(_)) {
            v.require(false, "handleDownload config required");
        }
        v
    }

    async fn run(&self, ctx: &ExecCtx, node: &Node) -> Result<StepOutcome, StepError> {
        let NodeConfig::HandleDownload(cfg) = &node.config else {
            return Err(mismatch(node));
        };
        let timeout_ms = cfg
            .timeout_ms
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_MS)
            .min(self.deps.wait_cap_ms);

        let output = self
            .deps
            .executor
            .execute(
                ctx.tab(),
                FrameId::MAIN,
                ToolName::WaitDownload,
                json!({ "timeoutMs": timeout_ms }),
            )
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        let output = check_output(output)?;

        if let Some(save_as) = &cfg.save_as {
            if let Some(path) = output.json().and_then(|v| {
                v["path"].as_str().map(|s| s.to_string())
            }) {
                ctx.set_var(save_as.clone(), serde_json::Value::String(path));
            }
        }
        Ok(StepOutcome::Done)
    }
}
