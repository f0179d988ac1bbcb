//! Scriptable in-memory executor.
//!
//! Lets flows run end-to-end without a browser: every tool succeeds by
//! default, tab tools maintain a small tab table, and tests can queue
//! failures or canned outputs per tool.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use reflow_core_types::{FrameId, TabId};

use crate::{ActionExecutor, ExecutorError, TabLoadStatus, TabState, ToolName, ToolOutput};

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tab: TabId,
    pub frame: FrameId,
    pub tool: ToolName,
    pub args: Value,
}

#[derive(Default)]
struct StubState {
    tabs: HashMap<i64, TabState>,
    active_tab: i64,
    next_tab: i64,
    canned: HashMap<ToolName, VecDeque<ToolOutput>>,
    calls: Vec<ToolCallRecord>,
}

pub struct StubExecutor {
    state: Mutex<StubState>,
}

impl StubExecutor {
    pub fn new() -> Self {
        let mut state = StubState::default();
        state.tabs.insert(
            1,
            TabState {
                url: "about:blank".into(),
                status: TabLoadStatus::Complete,
            },
        );
        state.active_tab = 1;
        state.next_tab = 2;
        Self {
            state: Mutex::new(state),
        }
    }

    /// Queue a canned output for the next invocation of `tool`.
    pub fn push_response(&self, tool: ToolName, output: ToolOutput) {
        self.state
            .lock()
            .canned
            .entry(tool)
            .or_default()
            .push_back(output);
    }

    /// Queue `n` consecutive failures for `tool`.
    pub fn fail_next(&self, tool: ToolName, message: &str, n: usize) {
        for _ in 0..n {
            self.push_response(tool, ToolOutput::error(message));
        }
    }

    /// Calls recorded so far, in invocation order.
    pub fn calls(&self) -> Vec<ToolCallRecord> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, tool: ToolName) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.tool == tool)
            .count()
    }

    fn default_output(state: &mut StubState, tab: TabId, tool: ToolName, args: &Value) -> ToolOutput {
        match tool {
            ToolName::Navigate => {
                let url = args["url"].as_str().unwrap_or("about:blank").to_string();
                if let Some(entry) = state.tabs.get_mut(&tab.0) {
                    entry.url = url;
                    entry.status = TabLoadStatus::Complete;
                }
                ToolOutput::ok()
            }
            ToolName::OpenTab => {
                let id = state.next_tab;
                state.next_tab += 1;
                state.tabs.insert(
                    id,
                    TabState {
                        url: args["url"].as_str().unwrap_or("about:blank").into(),
                        status: TabLoadStatus::Complete,
                    },
                );
                state.active_tab = id;
                ToolOutput::ok_json(&serde_json::json!({ "tabId": id }))
            }
            ToolName::SwitchTab => {
                if let Some(id) = args["tabId"].as_i64() {
                    state.active_tab = id;
                }
                ToolOutput::ok_json(&serde_json::json!({ "tabId": state.active_tab }))
            }
            ToolName::CloseTab => {
                let id = args["tabId"].as_i64().unwrap_or(tab.0);
                state.tabs.remove(&id);
                ToolOutput::ok()
            }
            ToolName::Screenshot => ToolOutput {
                is_error: false,
                content: vec![crate::ContentItem::Image {
                    data: "iVBORw0KGgo=".into(),
                }],
            },
            ToolName::HttpRequest => ToolOutput::ok_json(&serde_json::json!({
                "status": 200,
                "body": {}
            })),
            ToolName::WaitDownload => ToolOutput::ok_json(&serde_json::json!({
                "path": "/tmp/download.bin"
            })),
            _ => ToolOutput::ok(),
        }
    }
}

impl Default for StubExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for StubExecutor {
    async fn execute(
        &self,
        tab: TabId,
        frame: FrameId,
        tool: ToolName,
        args: Value,
    ) -> Result<ToolOutput, ExecutorError> {
        let mut state = self.state.lock();
        state.calls.push(ToolCallRecord {
            tab,
            frame,
            tool,
            args: args.clone(),
        });

        if let Some(queue) = state.canned.get_mut(&tool) {
            if let Some(output) = queue.pop_front() {
                debug!(%tool, "stub executor returning canned output");
                return Ok(output);
            }
        }

        Ok(Self::default_output(&mut state, tab, tool, &args))
    }

    async fn tab_state(&self, tab: TabId) -> Result<TabState, ExecutorError> {
        self.state
            .lock()
            .tabs
            .get(&tab.0)
            .cloned()
            .ok_or(ExecutorError::UnknownTab(tab.0))
    }

    async fn wait_for_navigation(
        &self,
        _tab: TabId,
        _previous: &TabState,
        _timeout_ms: u64,
    ) -> Result<bool, ExecutorError> {
        Ok(true)
    }

    async fn wait_for_network_idle(
        &self,
        _tab: TabId,
        _timeout_ms: u64,
    ) -> Result<bool, ExecutorError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn canned_failures_drain_before_defaults() {
        let stub = StubExecutor::new();
        stub.fail_next(ToolName::Click, "element not visible", 1);

        let first = stub
            .execute(TabId(1), FrameId::MAIN, ToolName::Click, json!({}))
            .await
            .unwrap();
        assert!(first.is_error);

        let second = stub
            .execute(TabId(1), FrameId::MAIN, ToolName::Click, json!({}))
            .await
            .unwrap();
        assert!(!second.is_error);
        assert_eq!(stub.calls_for(ToolName::Click), 2);
    }

    #[tokio::test]
    async fn navigate_updates_tab_state() {
        let stub = StubExecutor::new();
        stub.execute(
            TabId(1),
            FrameId::MAIN,
            ToolName::Navigate,
            json!({"url": "https://example.com"}),
        )
        .await
        .unwrap();
        let state = stub.tab_state(TabId(1)).await.unwrap();
        assert_eq!(state.url, "https://example.com");
    }
}
