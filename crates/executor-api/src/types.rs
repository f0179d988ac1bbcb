//! Tool catalog and output envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed catalog of executor tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolName {
    Navigate,
    Click,
    Fill,
    Keyboard,
    Scroll,
    Drag,
    Screenshot,
    FileUpload,
    HttpRequest,
    NetworkCapture,
    OpenTab,
    SwitchTab,
    CloseTab,
    WaitDownload,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Navigate => "navigate",
            ToolName::Click => "click",
            ToolName::Fill => "fill",
            ToolName::Keyboard => "keyboard",
            ToolName::Scroll => "scroll",
            ToolName::Drag => "drag",
            ToolName::Screenshot => "screenshot",
            ToolName::FileUpload => "fileUpload",
            ToolName::HttpRequest => "httpRequest",
            ToolName::NetworkCapture => "networkCapture",
            ToolName::OpenTab => "openTab",
            ToolName::SwitchTab => "switchTab",
            ToolName::CloseTab => "closeTab",
            ToolName::WaitDownload => "waitDownload",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One content item of a tool output: text (possibly JSON) or image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
    Image { data: String },
}

/// Executor result envelope. `is_error` is the sole failure signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl ToolOutput {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn ok_text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ContentItem::Text { text: text.into() }],
        }
    }

    pub fn ok_json(value: &Value) -> Self {
        Self::ok_text(value.to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ContentItem::Text {
                text: message.into(),
            }],
        }
    }

    /// First text payload, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ContentItem::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// First text payload parsed as JSON.
    pub fn json(&self) -> Option<Value> {
        self.text().and_then(|t| serde_json::from_str(t).ok())
    }

    /// First image payload, if any.
    pub fn image(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ContentItem::Image { data } => Some(data.as_str()),
            _ => None,
        })
    }
}

/// Tab load status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabLoadStatus {
    Loading,
    Complete,
}

/// Pre-execution tab state captured for navigation comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub url: String,
    pub status: TabLoadStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_parses_json_payload() {
        let output = ToolOutput::ok_json(&json!({"saved": true}));
        assert!(!output.is_error);
        assert_eq!(output.json().unwrap()["saved"], true);
    }

    #[test]
    fn error_output_carries_message() {
        let output = ToolOutput::error("element not visible");
        assert!(output.is_error);
        assert_eq!(output.text(), Some("element not visible"));
    }
}
