//! Flow, node and edge structures.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reflow_core_types::{FlowId, TabId};

use crate::config::{NodeConfig, NodeKind, RetrySpec};

/// Label marking the main execution path. Only default-labelled edges
/// participate in topological ordering; any other label is looked up on
/// demand when a conditional node returns a branch decision.
pub const DEFAULT_LABEL: &str = "default";

/// One executable step in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,

    /// Editor placement hint, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,

    #[serde(flatten)]
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            disabled: false,
            ui: None,
            retry: None,
            config,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Flattened timeline representation: the config object merged with
    /// `id` and `type`, where `id`/`type` always win over same-named
    /// config keys.
    pub fn to_timeline_step(&self) -> Value {
        let mut obj = match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        obj.insert("id".into(), Value::String(self.id.clone()));
        obj.insert("type".into(), Value::String(self.kind().as_str().into()));
        Value::Object(obj)
    }
}

/// Directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_label() -> String {
    DEFAULT_LABEL.to_string()
}

impl Edge {
    pub fn default_edge(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            label: DEFAULT_LABEL.to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.label == DEFAULT_LABEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Boolean,
    Enum,
    Array,
}

/// Declared run variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDef {
    pub key: String,
    pub var_type: VarType,

    /// Excluded from default snapshots and logs.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values for enum variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

impl VariableDef {
    /// Check a supplied value against the declared type and, for enums,
    /// the allowed options.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let type_ok = match self.var_type {
            VarType::String => value.is_string(),
            VarType::Number => value.is_number(),
            VarType::Boolean => value.is_boolean(),
            VarType::Array => value.is_array(),
            VarType::Enum => self.options.is_empty() || self.options.contains(value),
        };
        if !type_ok {
            return Err(match self.var_type {
                VarType::Enum => format!("variable '{}' is not one of the allowed options", self.key),
                other => format!("variable '{}' must be a {other:?}", self.key),
            });
        }
        Ok(())
    }
}

/// Per-tab outcome of the recording stop barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabBarrierFailure {
    pub tab: TabId,
    pub reason: String,
}

/// Stop-barrier diagnostics persisted with the flow so a partially
/// acknowledged stop remains observable after the fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBarrierReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TabBarrierFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Domains the flow was recorded against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_barrier: Option<StopBarrierReport>,
}

impl Default for FlowMeta {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            domains: Vec::new(),
            stop_barrier: None,
        }
    }
}

/// Named nested node/edge graph, invoked by foreach/while/executeFlow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A named, versioned automation unit: the DAG that recording builds and
/// replay executes. Read-only during replay; the runner writes ephemeral
/// variables at runtime but never mutates the persisted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDef>,

    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub subflows: HashMap<String, Subgraph>,

    #[serde(default)]
    pub meta: FlowMeta,
}

fn default_version() -> u32 {
    1
}

impl Flow {
    /// Create an empty flow, as the recording session does at start.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(),
            name: name.into(),
            version: 1,
            variables: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            subflows: HashMap::new(),
            meta: FlowMeta::default(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edge from `from` carrying `label`, used for branch dispatch.
    pub fn edge_with_label<'a>(&'a self, from: &str, label: &str) -> Option<&'a Edge> {
        self.edges.iter().find(|e| e.from == from && e.label == label)
    }

    pub fn subflow(&self, id: &str) -> Option<&Subgraph> {
        self.subflows.get(id)
    }

    pub fn touch(&mut self) {
        self.meta.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavigateConfig, NodeConfig};

    fn navigate(id: &str, url: &str) -> Node {
        Node::new(
            id,
            NodeConfig::Navigate(NavigateConfig {
                url: url.to_string(),
            }),
        )
    }

    #[test]
    fn node_round_trips_with_flattened_config() {
        let node = navigate("s1", "https://example.com");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "s1");
        assert_eq!(json["type"], "navigate");
        assert_eq!(json["url"], "https://example.com");

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn timeline_step_id_and_type_win_over_config_keys() {
        // A script step whose code would not collide, plus a synthetic
        // check that inserting id/type after the config overwrites.
        let node = navigate("s9", "https://example.com");
        let step = node.to_timeline_step();
        assert_eq!(step["id"], "s9");
        assert_eq!(step["type"], "navigate");
        assert_eq!(step["url"], "https://example.com");
    }

    #[test]
    fn edge_label_defaults_to_default() {
        let edge: Edge = serde_json::from_value(serde_json::json!({
            "id": "e1", "from": "a", "to": "b"
        }))
        .unwrap();
        assert!(edge.is_default());
    }
}
