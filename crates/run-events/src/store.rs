//! Durable event store port and in-memory implementation.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use reflow_core_types::RunId;

use crate::model::{NewRunEvent, RunEvent};
use crate::EventError;

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub run_id: RunId,
    pub from_seq: Option<u64>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id,
            from_seq: None,
            limit: None,
        }
    }
}

/// Events store port. `append` must linearize sequence allocation per run:
/// the returned event's `seq` and the run's next-sequence counter update
/// atomically, before the event is visible to any reader.
#[async_trait]
pub trait EventsStore: Send + Sync {
    async fn append(&self, input: NewRunEvent) -> Result<RunEvent, EventError>;

    /// Events for a run, ascending by `seq`.
    async fn list(&self, query: EventQuery) -> Result<Vec<RunEvent>, EventError>;
}

#[derive(Default)]
struct RunLogState {
    next_seq: u64,
    events: Vec<RunEvent>,
}

/// In-memory store: one mutex-guarded log per run, so concurrent appends
/// for the same run serialize on the run's lock while different runs do
/// not contend.
#[derive(Default)]
pub struct InMemoryEventsStore {
    runs: DashMap<RunId, Arc<Mutex<RunLogState>>>,
}

impl InMemoryEventsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_log(&self, run_id: &RunId) -> Arc<Mutex<RunLogState>> {
        self.runs
            .entry(run_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RunLogState {
                    next_seq: 1,
                    events: Vec::new(),
                }))
            })
            .clone()
    }
}

#[async_trait]
impl EventsStore for InMemoryEventsStore {
    async fn append(&self, input: NewRunEvent) -> Result<RunEvent, EventError> {
        let log = self.run_log(&input.run_id);
        let mut state = log.lock();
        let event = RunEvent {
            run_id: input.run_id,
            seq: state.next_seq,
            ts: Utc::now(),
            kind: input.kind,
            node_id: input.node_id,
        };
        state.next_seq += 1;
        state.events.push(event.clone());
        Ok(event)
    }

    async fn list(&self, query: EventQuery) -> Result<Vec<RunEvent>, EventError> {
        let Some(log) = self.runs.get(&query.run_id).map(|e| e.clone()) else {
            return Ok(Vec::new());
        };
        let state = log.lock();
        let from = query.from_seq.unwrap_or(0);
        let mut events: Vec<RunEvent> = state
            .events
            .iter()
            .filter(|e| e.seq >= from)
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}
