//! Per-frame content-script RPC port.
//!
//! Each frame of a tab hosts a content script reachable over the browser
//! messaging boundary; this trait is the engine-side surface of that RPC.
//! Composite selectors are always asked of the top frame, which bridges
//! into the child document and reports its URL so the caller can map back
//! to a concrete frame id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reflow_core_types::{FrameId, TabId};

use crate::errors::LocatorError;

/// Element handle returned by the content script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefHandle {
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<(f64, f64)>,
}

/// Result of bridging a composite selector from the top frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeHit {
    pub handle: RefHandle,
    /// URL of the child document hosting the element.
    pub child_url: String,
}

#[async_trait]
pub trait FrameBridge: Send + Sync {
    /// Query a CSS selector and pin a ref to the first match.
    async fn ensure_ref_for_selector(
        &self,
        tab: TabId,
        frame: FrameId,
        selector: &str,
    ) -> Result<Option<RefHandle>, LocatorError>;

    /// Re-validate a previously issued ref. Valid only within the same
    /// page lifecycle.
    async fn resolve_ref(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
    ) -> Result<Option<RefHandle>, LocatorError>;

    /// Evaluate an XPath expression via the injected helper.
    async fn query_xpath(
        &self,
        tab: TabId,
        frame: FrameId,
        xpath: &str,
    ) -> Result<Option<RefHandle>, LocatorError>;

    /// Find an element by visible text, optionally narrowed by tag.
    async fn query_text(
        &self,
        tab: TabId,
        frame: FrameId,
        text: &str,
        tag: Option<&str>,
    ) -> Result<Option<RefHandle>, LocatorError>;

    /// Resolve a composite `outer |> inner` selector from the top frame.
    async fn bridge_composite(
        &self,
        tab: TabId,
        outer: &str,
        inner: &str,
    ) -> Result<Option<CompositeHit>, LocatorError>;

    /// Map a child document URL back to its frame id.
    async fn frame_for_url(&self, tab: TabId, url: &str)
        -> Result<Option<FrameId>, LocatorError>;

    /// Read an attribute (or text content when `attribute` is None).
    async fn read_attribute(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
        attribute: Option<&str>,
    ) -> Result<Option<String>, LocatorError>;

    /// Focus an element, scrolling it into view if needed.
    async fn focus_by_ref(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
    ) -> Result<bool, LocatorError>;

    /// Whether the element is a file-type input (drives fill→upload
    /// auto-detection).
    async fn is_file_input(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
    ) -> Result<bool, LocatorError>;

    /// Run a user script in the frame, returning its JSON result.
    async fn eval_script(
        &self,
        tab: TabId,
        frame: FrameId,
        code: &str,
        arg: Value,
    ) -> Result<Value, LocatorError>;

    /// Dispatch a synthetic DOM event on an element.
    async fn dispatch_event(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
        event: &str,
    ) -> Result<(), LocatorError>;

    /// Set an attribute on an element.
    async fn set_attribute(
        &self,
        tab: TabId,
        frame: FrameId,
        ref_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), LocatorError>;

    /// Count elements matching a selector (used by element loops).
    async fn query_all(
        &self,
        tab: TabId,
        frame: FrameId,
        selector: &str,
    ) -> Result<Vec<RefHandle>, LocatorError>;
}
