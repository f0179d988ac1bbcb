//! Stand-in implementations of the browser-facing ports, used by the CLI
//! and tests to exercise flows without a browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use element_locator::{CompositeHit, FrameBridge, LocatorError, RefHandle};
use recording_session::{ControlMessage, SessionError, TabChannel};
use reflow_core_types::{FrameId, TabId};

/// Frame bridge that answers every selector with a synthetic ref.
///
/// Good enough to drive recorded flows through the stub executor; swap in
/// a real bridge to talk to actual content scripts.
#[derive(Default)]
pub struct StubBridge {
    refs_issued: Mutex<u64>,
    attributes: Mutex<HashMap<String, String>>,
}

impl StubBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute_value(&self, ref_id: &str, value: &str) {
        self.attributes
            .lock()
            .insert(ref_id.to_string(), value.to_string());
    }

    fn next_ref(&self) -> RefHandle {
        let mut counter = self.refs_issued.lock();
        *counter += 1;
        RefHandle {
            ref_id: format!("stub-ref-{counter}"),
            center: Some((100.0, 100.0)),
        }
    }
}

#[async_trait]
impl FrameBridge for StubBridge {
    async fn ensure_ref_for_selector(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _selector: &str,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(Some(self.next_ref()))
    }

    async fn resolve_ref(
        &self,
        _tab: TabId,
        _frame: FrameId,
        ref_id: &str,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(Some(RefHandle {
            ref_id: ref_id.to_string(),
            center: Some((100.0, 100.0)),
        }))
    }

    async fn query_xpath(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _xpath: &str,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(Some(self.next_ref()))
    }

    async fn query_text(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _text: &str,
        _tag: Option<&str>,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(Some(self.next_ref()))
    }

    async fn bridge_composite(
        &self,
        _tab: TabId,
        _outer: &str,
        _inner: &str,
    ) -> Result<Option<CompositeHit>, LocatorError> {
        Ok(Some(CompositeHit {
            handle: self.next_ref(),
            child_url: "about:blank".into(),
        }))
    }

    async fn frame_for_url(
        &self,
        _tab: TabId,
        _url: &str,
    ) -> Result<Option<FrameId>, LocatorError> {
        Ok(Some(FrameId::MAIN))
    }

    async fn read_attribute(
        &self,
        _tab: TabId,
        _frame: FrameId,
        ref_id: &str,
        _attribute: Option<&str>,
    ) -> Result<Option<String>, LocatorError> {
        Ok(Some(
            self.attributes
                .lock()
                .get(ref_id)
                .cloned()
                .unwrap_or_else(|| "stub".to_string()),
        ))
    }

    async fn focus_by_ref(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _ref_id: &str,
    ) -> Result<bool, LocatorError> {
        Ok(true)
    }

    async fn is_file_input(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _ref_id: &str,
    ) -> Result<bool, LocatorError> {
        Ok(false)
    }

    async fn eval_script(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _code: &str,
        _arg: Value,
    ) -> Result<Value, LocatorError> {
        Ok(Value::Null)
    }

    async fn dispatch_event(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _ref_id: &str,
        _event: &str,
    ) -> Result<(), LocatorError> {
        Ok(())
    }

    async fn set_attribute(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _ref_id: &str,
        _name: &str,
        _value: &str,
    ) -> Result<(), LocatorError> {
        Ok(())
    }

    async fn query_all(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _selector: &str,
    ) -> Result<Vec<RefHandle>, LocatorError> {
        Ok(vec![self.next_ref(), self.next_ref()])
    }
}

/// Tab channel that acknowledges everything immediately.
#[derive(Default)]
pub struct StubTabChannel {
    timelines_pushed: Mutex<usize>,
}

impl StubTabChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timelines_pushed(&self) -> usize {
        *self.timelines_pushed.lock()
    }
}

#[async_trait]
impl TabChannel for StubTabChannel {
    async fn list_frames(&self, _tab: TabId) -> Result<Vec<FrameId>, SessionError> {
        Ok(vec![FrameId::MAIN])
    }

    async fn send_control(
        &self,
        _tab: TabId,
        _message: ControlMessage,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    async fn request_stop_ack(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _timeout_ms: u64,
    ) -> Result<bool, SessionError> {
        Ok(true)
    }

    async fn push_timeline(&self, _tab: TabId, _steps: &[Value]) -> Result<(), SessionError> {
        *self.timelines_pushed.lock() += 1;
        Ok(())
    }
}
