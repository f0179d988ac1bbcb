//! The stop barrier: timeout-bounded ACK collection across tabs/frames.
//!
//! On stop, every active tab is asked to flush and acknowledge. Within a
//! tab, subframes are asked before the top frame with a shorter,
//! best-effort timeout, so the top frame (still forwarding their messages)
//! is not torn down prematurely. A tab counts as stopped only once its
//! main frame acknowledges within the bounded timeout. The outcome is
//! recorded into the flow metadata instead of silently dropping the last
//! captured steps.

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use flow_model::{Flow, StopBarrierReport, TabBarrierFailure};
use reflow_core_types::TabId;

use crate::errors::SessionError;
use crate::session::{RecordingSession, RecordingState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierConfig {
    /// Bounded wait for a tab's main-frame acknowledgement.
    pub main_frame_timeout_ms: u64,
    /// Best-effort wait per subframe.
    pub subframe_timeout_ms: u64,
    /// Settle window after all ACKs (or timeouts) to absorb last-moment
    /// in-flight messages.
    pub grace_ms: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            main_frame_timeout_ms: 3_000,
            subframe_timeout_ms: 800,
            grace_ms: 150,
        }
    }
}

impl RecordingSession {
    /// Transition into `Stopping`. Steps already in flight from content
    /// scripts keep landing until the barrier completes.
    pub fn begin_stopping(&self) -> Result<Vec<TabId>, SessionError> {
        let mut state = self.state.lock();
        match state.phase {
            RecordingState::Recording | RecordingState::Paused => {
                state.phase = RecordingState::Stopping;
                Ok(state.active_tabs.keys().copied().collect())
            }
            other => Err(SessionError::InvalidState {
                expected: "recording|paused",
                actual: other.name(),
            }),
        }
    }

    /// Run the stop barrier and finalize the recording.
    ///
    /// Barrier failure is not fatal: the flow is still returned, with the
    /// per-tab outcome recorded in `meta.stop_barrier` for post-hoc
    /// diagnosis.
    pub async fn stop(&self) -> Result<(Flow, StopBarrierReport), SessionError> {
        let tabs = self.begin_stopping()?;
        info!(tabs = tabs.len(), "stop barrier started");

        let mut failures = Vec::new();
        for tab in tabs {
            let acked = self.stop_tab(tab).await;
            let all_done = self.mark_tab_stopped(
                tab,
                acked,
                (!acked).then(|| "main frame did not acknowledge stop".to_string()),
            );
            if !acked {
                warn!(%tab, "tab missed stop acknowledgement");
                failures.push(TabBarrierFailure {
                    tab,
                    reason: "main frame did not acknowledge stop".into(),
                });
            }
            if all_done {
                info!("all active tabs acknowledged stop");
            }
        }

        // Absorb last-moment in-flight messages before teardown.
        sleep(Duration::from_millis(self.barrier.grace_ms)).await;

        let report = StopBarrierReport {
            ok: failures.is_empty(),
            failures,
        };
        let flow = self.finalize(report.clone())?;
        Ok((flow, report))
    }

    /// Drain one tab: subframes first (best effort), then the main frame
    /// (authoritative). Returns whether the main frame acknowledged.
    async fn stop_tab(&self, tab: TabId) -> bool {
        let frames = match self.channel.list_frames(tab).await {
            Ok(frames) => frames,
            Err(err) => {
                warn!(%tab, %err, "frame listing failed; treating tab as unacknowledged");
                return false;
            }
        };

        for frame in frames.iter().filter(|f| !f.is_main()) {
            match self
                .channel
                .request_stop_ack(tab, *frame, self.barrier.subframe_timeout_ms)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(%tab, %frame, "subframe stop ack timed out (best effort)"),
                Err(err) => warn!(%tab, %frame, %err, "subframe stop request failed"),
            }
        }

        let main = frames
            .iter()
            .copied()
            .find(|f| f.is_main())
            .unwrap_or_default();
        match self
            .channel
            .request_stop_ack(tab, main, self.barrier.main_frame_timeout_ms)
            .await
        {
            Ok(acked) => acked,
            Err(err) => {
                warn!(%tab, %err, "main frame stop request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ControlMessage, TabChannel};
    use crate::session::CapturedStep;
    use async_trait::async_trait;
    use flow_model::{NavigateConfig, NodeConfig};
    use parking_lot::Mutex;
    use reflow_core_types::FrameId;
    use serde_json::Value;
    use std::sync::Arc;

    /// Channel where chosen tabs never acknowledge their main frame.
    struct FlakyChannel {
        dead_tabs: Vec<TabId>,
        subframe_requests: Mutex<Vec<(TabId, FrameId)>>,
    }

    impl FlakyChannel {
        fn new(dead_tabs: Vec<TabId>) -> Self {
            Self {
                dead_tabs,
                subframe_requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TabChannel for FlakyChannel {
        async fn list_frames(&self, _tab: TabId) -> Result<Vec<FrameId>, SessionError> {
            Ok(vec![FrameId(7), FrameId::MAIN])
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
            tab: TabId,
            frame: FrameId,
            _timeout_ms: u64,
        ) -> Result<bool, SessionError> {
            if !frame.is_main() {
                self.subframe_requests.lock().push((tab, frame));
                return Ok(true);
            }
            Ok(!self.dead_tabs.contains(&tab))
        }

        async fn push_timeline(&self, _tab: TabId, _steps: &[Value]) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn quick_barrier() -> BarrierConfig {
        BarrierConfig {
            main_frame_timeout_ms: 50,
            subframe_timeout_ms: 10,
            grace_ms: 1,
        }
    }

    async fn recording_session(channel: Arc<dyn TabChannel>) -> RecordingSession {
        let session = RecordingSession::new(channel, quick_barrier());
        session.start_session("demo", TabId(1)).await.unwrap();
        session
            .append_steps(vec![CapturedStep {
                id: "s1".into(),
                tab: None,
                config: NodeConfig::Navigate(NavigateConfig {
                    url: "https://a".into(),
                }),
            }])
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn clean_stop_reports_ok() {
        let channel = Arc::new(FlakyChannel::new(vec![]));
        let session = recording_session(channel.clone()).await;

        let (flow, report) = session.stop().await.unwrap();
        assert!(report.ok);
        assert_eq!(flow.meta.stop_barrier.as_ref().unwrap().ok, true);
        assert_eq!(flow.nodes.len(), 1);
        assert_eq!(session.phase(), RecordingState::Idle);

        // subframes were drained before the main frame
        let requests = channel.subframe_requests.lock();
        assert!(!requests.is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_tab_is_reported_not_fatal() {
        let session = recording_session(Arc::new(FlakyChannel::new(vec![TabId(2)]))).await;
        session.note_tab(TabId(2));

        let (flow, report) = session.stop().await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tab, TabId(2));

        // the flow survives with the diagnostic attached
        let barrier = flow.meta.stop_barrier.unwrap();
        assert!(!barrier.ok);
        assert_eq!(flow.nodes.len(), 1);
    }

    #[tokio::test]
    async fn stopping_still_accepts_steps_until_finalized() {
        let session = recording_session(Arc::new(FlakyChannel::new(vec![]))).await;
        session.begin_stopping().unwrap();
        assert!(session.can_accept_steps());

        session
            .append_steps(vec![CapturedStep {
                id: "s2".into(),
                tab: None,
                config: NodeConfig::Navigate(NavigateConfig {
                    url: "https://b".into(),
                }),
            }])
            .await
            .unwrap();
        assert_eq!(session.current_flow().unwrap().nodes.len(), 2);
    }
}
