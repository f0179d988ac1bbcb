//! The recording state machine and live DAG synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use flow_model::{
    ensure_linear_invariant, Edge, Flow, Node, NodeConfig, StopBarrierReport,
};
use reflow_core_types::TabId;

use crate::barrier::BarrierConfig;
use crate::channel::{ControlMessage, TabChannel};
use crate::errors::SessionError;

/// Session phases. Only `Recording` and `Stopping` accept captured steps;
/// `Stopping` exists to drain steps already in flight from content scripts
/// when the user stops mid-capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
    Stopping,
}

impl RecordingState {
    pub fn name(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
            RecordingState::Stopping => "stopping",
        }
    }
}

/// One captured step coming off a content script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabId>,
    #[serde(flatten)]
    pub config: NodeConfig,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct TabRecord {
    pub stopped: bool,
    pub failure: Option<String>,
}

pub(crate) struct SessionState {
    pub phase: RecordingState,
    pub flow: Option<Flow>,
    /// Incremental node-id → index cache, rebuilt at session start.
    pub node_index: HashMap<String, usize>,
    /// Edge-id sequence counter for incremental chaining.
    pub edge_seq: u64,
    pub active_tabs: HashMap<TabId, TabRecord>,
    pub origin_tab: Option<TabId>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: RecordingState::Idle,
            flow: None,
            node_index: HashMap::new(),
            edge_seq: 0,
            active_tabs: HashMap::new(),
            origin_tab: None,
        }
    }
}

/// Recording session manager.
///
/// Constructed and injected explicitly; the background process holds a
/// reference rather than importing a module-level instance.
pub struct RecordingSession {
    pub(crate) channel: Arc<dyn TabChannel>,
    pub(crate) barrier: BarrierConfig,
    pub(crate) state: Mutex<SessionState>,
}

impl RecordingSession {
    pub fn new(channel: Arc<dyn TabChannel>, barrier: BarrierConfig) -> Self {
        Self {
            channel,
            barrier,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Reset to idle, dropping any partially recorded flow.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if state.phase != RecordingState::Idle {
            warn!(phase = state.phase.name(), "disposing active session");
        }
        *state = SessionState::new();
    }

    pub fn phase(&self) -> RecordingState {
        self.state.lock().phase
    }

    /// Whether incoming captured steps are accepted right now.
    pub fn can_accept_steps(&self) -> bool {
        matches!(
            self.state.lock().phase,
            RecordingState::Recording | RecordingState::Stopping
        )
    }

    /// Begin a new recording: resets the incremental caches and seeds the
    /// active-tab set with the origin tab.
    pub async fn start_session(
        &self,
        flow_name: &str,
        origin_tab: TabId,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            if state.phase != RecordingState::Idle {
                return Err(SessionError::InvalidState {
                    expected: "idle",
                    actual: state.phase.name(),
                });
            }
            *state = SessionState::new();
            state.phase = RecordingState::Recording;
            state.flow = Some(Flow::new(flow_name));
            state.origin_tab = Some(origin_tab);
            state.active_tabs.insert(origin_tab, TabRecord::default());
        }
        info!(flow = flow_name, %origin_tab, "recording started");
        self.channel
            .send_control(origin_tab, ControlMessage::Start)
            .await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        let tabs = {
            let mut state = self.state.lock();
            if state.phase != RecordingState::Recording {
                return Err(SessionError::InvalidState {
                    expected: "recording",
                    actual: state.phase.name(),
                });
            }
            state.phase = RecordingState::Paused;
            state.active_tabs.keys().copied().collect::<Vec<_>>()
        };
        self.broadcast(&tabs, ControlMessage::Pause).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        let tabs = {
            let mut state = self.state.lock();
            if state.phase != RecordingState::Paused {
                return Err(SessionError::InvalidState {
                    expected: "paused",
                    actual: state.phase.name(),
                });
            }
            state.phase = RecordingState::Recording;
            state.active_tabs.keys().copied().collect::<Vec<_>>()
        };
        self.broadcast(&tabs, ControlMessage::Resume).await;
        Ok(())
    }

    /// Register a tab that started forwarding captures mid-session.
    pub fn note_tab(&self, tab: TabId) {
        let mut state = self.state.lock();
        if matches!(
            state.phase,
            RecordingState::Recording | RecordingState::Stopping
        ) {
            state.active_tabs.entry(tab).or_default();
        }
    }

    /// Upsert a batch of captured steps into the flow.
    ///
    /// Known ids replace the node's config in place (progressive capture
    /// of a single fill as the user keeps typing); new ids append a node
    /// and chain a default edge from the previous node. The linear-chain
    /// invariant is checked before and after the batch and repaired by a
    /// full rechain on violation.
    pub async fn append_steps(&self, steps: Vec<CapturedStep>) -> Result<(), SessionError> {
        let (timeline, tabs) = {
            let mut state = self.state.lock();
            if !matches!(
                state.phase,
                RecordingState::Recording | RecordingState::Stopping
            ) {
                return Err(SessionError::NotAcceptingSteps);
            }

            for step in &steps {
                if let Some(tab) = step.tab {
                    state.active_tabs.entry(tab).or_default();
                }
            }

            let edge_seq = state.edge_seq;
            let mut index = std::mem::take(&mut state.node_index);
            let flow = state.flow.as_mut().ok_or(SessionError::NoActiveFlow)?;

            let mut edge_seq = edge_seq;
            if ensure_linear_invariant(&flow.nodes, &mut flow.edges) {
                warn!("pre-batch invariant repair applied");
                edge_seq = flow.edges.len() as u64;
            }

            for step in steps {
                match index.get(&step.id) {
                    Some(&idx) => {
                        debug!(id = %step.id, "upserting existing step in place");
                        flow.nodes[idx].config = step.config;
                    }
                    None => {
                        let previous = flow.nodes.last().map(|n| n.id.clone());
                        let idx = flow.nodes.len();
                        flow.nodes.push(Node::new(step.id.clone(), step.config));
                        index.insert(step.id.clone(), idx);
                        if let Some(previous) = previous {
                            edge_seq += 1;
                            flow.edges.push(Edge::default_edge(
                                format!("edge-{edge_seq}"),
                                previous,
                                step.id,
                            ));
                        }
                    }
                }
            }

            if ensure_linear_invariant(&flow.nodes, &mut flow.edges) {
                warn!("post-batch invariant repair applied");
                edge_seq = flow.edges.len() as u64;
            }
            flow.touch();

            let timeline: Vec<Value> = flow.nodes.iter().map(|n| n.to_timeline_step()).collect();
            state.node_index = index;
            state.edge_seq = edge_seq;
            let tabs: Vec<TabId> = state.active_tabs.keys().copied().collect();
            (timeline, tabs)
        };

        // Broadcast outside the lock so a slow tab cannot stall capture.
        for tab in tabs {
            if let Err(err) = self.channel.push_timeline(tab, &timeline).await {
                debug!(%tab, %err, "timeline push failed");
            }
        }
        Ok(())
    }

    /// Snapshot of the flow being recorded, for overlays and diagnostics.
    pub fn current_flow(&self) -> Option<Flow> {
        self.state.lock().flow.clone()
    }

    /// Aggregate one tab's stop acknowledgement. Returns whether every
    /// active tab has now acknowledged.
    pub fn mark_tab_stopped(&self, tab: TabId, acked: bool, reason: Option<String>) -> bool {
        let mut state = self.state.lock();
        if let Some(record) = state.active_tabs.get_mut(&tab) {
            record.stopped = true;
            record.failure = if acked { None } else { reason };
        }
        state.active_tabs.values().all(|r| r.stopped)
    }

    pub(crate) fn finalize(&self, report: StopBarrierReport) -> Result<Flow, SessionError> {
        let mut state = self.state.lock();
        let mut flow = state.flow.take().ok_or(SessionError::NoActiveFlow)?;
        flow.meta.stop_barrier = Some(report);
        flow.touch();
        *state = SessionState::new();
        Ok(flow)
    }

    async fn broadcast(&self, tabs: &[TabId], message: ControlMessage) {
        for tab in tabs {
            if let Err(err) = self.channel.send_control(*tab, message).await {
                debug!(tab = %tab, %err, "control broadcast failed");
            }
        }
    }
}
