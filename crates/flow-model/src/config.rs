//! Per-kind step configuration payloads.
//!
//! `NodeConfig` is the closed set of step kinds the engine understands,
//! internally tagged by `type` so a recorded step round-trips as
//! `{"type": "click", "target": {...}}`. Adding a kind here forces a
//! matching handler: the runtime registry matches exhaustively.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::target::TargetLocator;

/// Step kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Click,
    Dblclick,
    Fill,
    Navigate,
    Wait,
    Assert,
    Http,
    Extract,
    Script,
    OpenTab,
    SwitchTab,
    CloseTab,
    Scroll,
    Drag,
    Key,
    If,
    Foreach,
    While,
    ExecuteFlow,
    HandleDownload,
    Screenshot,
    TriggerEvent,
    SetAttribute,
    SwitchFrame,
    LoopElements,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Click => "click",
            NodeKind::Dblclick => "dblclick",
            NodeKind::Fill => "fill",
            NodeKind::Navigate => "navigate",
            NodeKind::Wait => "wait",
            NodeKind::Assert => "assert",
            NodeKind::Http => "http",
            NodeKind::Extract => "extract",
            NodeKind::Script => "script",
            NodeKind::OpenTab => "openTab",
            NodeKind::SwitchTab => "switchTab",
            NodeKind::CloseTab => "closeTab",
            NodeKind::Scroll => "scroll",
            NodeKind::Drag => "drag",
            NodeKind::Key => "key",
            NodeKind::If => "if",
            NodeKind::Foreach => "foreach",
            NodeKind::While => "while",
            NodeKind::ExecuteFlow => "executeFlow",
            NodeKind::HandleDownload => "handleDownload",
            NodeKind::Screenshot => "screenshot",
            NodeKind::TriggerEvent => "triggerEvent",
            NodeKind::SetAttribute => "setAttribute",
            NodeKind::SwitchFrame => "switchFrame",
            NodeKind::LoopElements => "loopElements",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed step configuration, tagged by step kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeConfig {
    Click(ClickConfig),
    Dblclick(ClickConfig),
    Fill(FillConfig),
    Navigate(NavigateConfig),
    Wait(WaitConfig),
    Assert(AssertConfig),
    Http(HttpConfig),
    Extract(ExtractConfig),
    Script(ScriptConfig),
    OpenTab(OpenTabConfig),
    SwitchTab(SwitchTabConfig),
    CloseTab(CloseTabConfig),
    Scroll(ScrollConfig),
    Drag(DragConfig),
    Key(KeyConfig),
    If(IfConfig),
    Foreach(ForeachConfig),
    While(WhileConfig),
    ExecuteFlow(ExecuteFlowConfig),
    HandleDownload(HandleDownloadConfig),
    Screenshot(ScreenshotConfig),
    TriggerEvent(TriggerEventConfig),
    SetAttribute(SetAttributeConfig),
    SwitchFrame(SwitchFrameConfig),
    LoopElements(LoopElementsConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::Click(_) => NodeKind::Click,
            NodeConfig::Dblclick(_) => NodeKind::Dblclick,
            NodeConfig::Fill(_) => NodeKind::Fill,
            NodeConfig::Navigate(_) => NodeKind::Navigate,
            NodeConfig::Wait(_) => NodeKind::Wait,
            NodeConfig::Assert(_) => NodeKind::Assert,
            NodeConfig::Http(_) => NodeKind::Http,
            NodeConfig::Extract(_) => NodeKind::Extract,
            NodeConfig::Script(_) => NodeKind::Script,
            NodeConfig::OpenTab(_) => NodeKind::OpenTab,
            NodeConfig::SwitchTab(_) => NodeKind::SwitchTab,
            NodeConfig::CloseTab(_) => NodeKind::CloseTab,
            NodeConfig::Scroll(_) => NodeKind::Scroll,
            NodeConfig::Drag(_) => NodeKind::Drag,
            NodeConfig::Key(_) => NodeKind::Key,
            NodeConfig::If(_) => NodeKind::If,
            NodeConfig::Foreach(_) => NodeKind::Foreach,
            NodeConfig::While(_) => NodeKind::While,
            NodeConfig::ExecuteFlow(_) => NodeKind::ExecuteFlow,
            NodeConfig::HandleDownload(_) => NodeKind::HandleDownload,
            NodeConfig::Screenshot(_) => NodeKind::Screenshot,
            NodeConfig::TriggerEvent(_) => NodeKind::TriggerEvent,
            NodeConfig::SetAttribute(_) => NodeKind::SetAttribute,
            NodeConfig::SwitchFrame(_) => NodeKind::SwitchFrame,
            NodeConfig::LoopElements(_) => NodeKind::LoopElements,
        }
    }
}

/// Retry policy declared on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Number of retries after the first attempt.
    pub count: u32,

    /// Delay before the first retry.
    #[serde(default = "default_retry_interval")]
    pub interval_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_retry_interval() -> u64 {
    1_000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Constant delay between attempts.
    #[default]
    Const,
    /// Delay doubles each attempt.
    Exp,
}

impl RetrySpec {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self.backoff {
            Backoff::Const => self.interval_ms,
            Backoff::Exp => self.interval_ms.saturating_mul(1u64 << (attempt - 1).min(16)),
        }
    }
}

/// Wait condition applied after a click that is known to navigate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitAfter {
    pub condition: WaitAfterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitAfterKind {
    Navigation,
    NetworkIdle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickConfig {
    pub target: TargetLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_after: Option<WaitAfter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillConfig {
    pub target: TargetLocator,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateConfig {
    pub url: String,
}

/// Wait step. Exactly one of the condition fields is expected; `validate`
/// on the handler enforces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetLocator>,
    pub assertion: Assertion,
    #[serde(default)]
    pub fail_strategy: FailStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Assertion {
    ElementExists,
    ElementVisible,
    TextContains { value: String },
    Expression { expression: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailStrategy {
    /// Throw: the step fails and the run aborts (subject to retry policy).
    #[default]
    Stop,
    /// Log a warning and continue.
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    pub target: TargetLocator,
    /// Attribute to read; element text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub save_as: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub code: String,
    /// Queue this script to run after the remaining steps instead of inline.
    #[serde(default)]
    pub run_after: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTabConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTabConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetLocator>,
    #[serde(default)]
    pub dx: i64,
    #[serde(default)]
    pub dy: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragConfig {
    pub source: TargetLocator,
    pub target: TargetLocator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    /// Key chord, e.g. "Enter" or "Control+a".
    pub keys: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetLocator>,
}

/// Conditional step.
///
/// Modern form: `branches` is a list of label+expression pairs evaluated in
/// order, first true branch wins, else control falls to `else_label` (or the
/// default edge). Legacy form: a single `expression`, or a `var`/`equals`
/// comparison, yielding branch label "true"/"false".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<CaseBranch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_label: Option<String>,

    // legacy single-condition fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseBranch {
    pub label: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeachConfig {
    pub list_var: String,
    pub item_var: String,
    pub subflow_id: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileConfig {
    pub condition: String,
    pub subflow_id: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    100
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFlowConfig {
    /// Named subflow of the current flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subflow_id: Option<String>,
    /// Another persisted flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleDownloadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotConfig {
    #[serde(default)]
    pub full_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEventConfig {
    pub target: TargetLocator,
    /// DOM event name, e.g. "change" or "input".
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttributeConfig {
    pub target: TargetLocator,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchFrameConfig {
    pub frame: FrameTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FrameTarget {
    Top,
    Parent,
    Index { index: i64 },
    Selector { selector: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopElementsConfig {
    /// CSS selector matched fresh at loop start.
    pub selector: String,
    pub item_var: String,
    pub subflow_id: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_with_type_tag() {
        let json = serde_json::json!({
            "type": "click",
            "target": { "selector": "#go", "candidates": [] },
            "waitAfter": { "condition": "navigation" }
        });
        let config: NodeConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.kind(), NodeKind::Click);
        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["type"], "click");
        assert_eq!(back["waitAfter"]["condition"], "navigation");
    }

    #[test]
    fn legacy_if_config_deserializes() {
        let config: NodeConfig = serde_json::from_value(serde_json::json!({
            "type": "if",
            "var": "status",
            "equals": "ready"
        }))
        .unwrap();
        match config {
            NodeConfig::If(cfg) => {
                assert_eq!(cfg.var.as_deref(), Some("status"));
                assert!(cfg.branches.is_none());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn exp_backoff_doubles_per_attempt() {
        let retry = RetrySpec {
            count: 3,
            interval_ms: 100,
            backoff: Backoff::Exp,
        };
        assert_eq!(retry.delay_ms(1), 100);
        assert_eq!(retry.delay_ms(2), 200);
        assert_eq!(retry.delay_ms(3), 400);

        let constant = RetrySpec {
            count: 3,
            interval_ms: 100,
            backoff: Backoff::Const,
        };
        assert_eq!(constant.delay_ms(3), 100);
    }
}
