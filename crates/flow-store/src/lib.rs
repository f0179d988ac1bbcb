//! Flow persistence port.
//!
//! The engine never talks to concrete storage; it holds this trait. The
//! in-memory implementation backs tests and the CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flow_model::Flow;
use reflow_core_types::FlowId;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Flow not found: {0}")]
    NotFound(FlowId),

    #[error("Flow store error: {0}")]
    Backend(String),
}

/// Listing row for flow pickers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: FlowId,
    pub name: String,
    pub version: u32,
    pub node_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Flow> for FlowSummary {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            version: flow.version,
            node_count: flow.nodes.len(),
            updated_at: flow.meta.updated_at,
        }
    }
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn get(&self, id: &FlowId) -> Result<Flow, StoreError>;
    async fn save(&self, flow: Flow) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<FlowSummary>, StoreError>;
    async fn delete(&self, id: &FlowId) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<FlowId, Flow>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn get(&self, id: &FlowId) -> Result<Flow, StoreError> {
        self.flows
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn save(&self, flow: Flow) -> Result<(), StoreError> {
        self.flows.insert(flow.id.clone(), flow);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FlowSummary>, StoreError> {
        let mut summaries: Vec<FlowSummary> =
            self.flows.iter().map(|entry| (&*entry).into()).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &FlowId) -> Result<bool, StoreError> {
        Ok(self.flows.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete_round_trip() {
        let store = InMemoryFlowStore::new();
        let flow = Flow::new("checkout");
        let id = flow.id.clone();

        store.save(flow).await.unwrap();
        let loaded = store.get(&id).await.unwrap();
        assert_eq!(loaded.name, "checkout");

        assert!(store.delete(&id).await.unwrap());
        assert!(matches!(
            store.get(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_returns_summaries() {
        let store = InMemoryFlowStore::new();
        store.save(Flow::new("a")).await.unwrap();
        store.save(Flow::new("b")).await.unwrap();
        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].node_count, 0);
    }
}
