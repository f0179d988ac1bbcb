//! Tab control channel port.
//!
//! Recording control messages are broadcast to every frame of a tab over
//! the browser messaging boundary. Stop requests support acknowledgement
//! so the barrier can confirm a frame flushed its in-flight captures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reflow_core_types::{FrameId, TabId};

use crate::errors::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMessage {
    Start,
    Stop,
    Pause,
    Resume,
}

#[async_trait]
pub trait TabChannel: Send + Sync {
    /// Frames currently alive in a tab, main frame included.
    async fn list_frames(&self, tab: TabId) -> Result<Vec<FrameId>, SessionError>;

    /// Fire-and-forget control broadcast to all frames of a tab.
    async fn send_control(&self, tab: TabId, message: ControlMessage) -> Result<(), SessionError>;

    /// Ask one frame to flush and acknowledge stop. Returns whether the
    /// frame acknowledged within `timeout_ms`.
    async fn request_stop_ack(
        &self,
        tab: TabId,
        frame: FrameId,
        timeout_ms: u64,
    ) -> Result<bool, SessionError>;

    /// Push the flattened step timeline so recorder overlays stay
    /// consistent in every participating tab.
    async fn push_timeline(&self, tab: TabId, steps: &[Value]) -> Result<(), SessionError>;
}
