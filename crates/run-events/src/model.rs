//! Event envelope and kind taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use reflow_core_types::RunId;

/// Event kind, serialized as its dotted name (`"run.started"`,
/// `"artifact.screenshot"`, ...). Artifact kinds are open-ended so new
/// artifact types never break older consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEventKind {
    RunStarted,
    NodeStarted,
    NodeSucceeded,
    NodeFailed,
    Artifact(String),
    RunSucceeded,
    RunFailed,
    RunCanceled,
}

impl RunEventKind {
    pub fn as_name(&self) -> String {
        match self {
            RunEventKind::RunStarted => "run.started".into(),
            RunEventKind::NodeStarted => "node.started".into(),
            RunEventKind::NodeSucceeded => "node.succeeded".into(),
            RunEventKind::NodeFailed => "node.failed".into(),
            RunEventKind::Artifact(kind) => format!("artifact.{kind}"),
            RunEventKind::RunSucceeded => "run.succeeded".into(),
            RunEventKind::RunFailed => "run.failed".into(),
            RunEventKind::RunCanceled => "run.canceled".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEventKind::RunSucceeded | RunEventKind::RunFailed | RunEventKind::RunCanceled
        )
    }
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_name())
    }
}

impl FromStr for RunEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run.started" => Ok(RunEventKind::RunStarted),
            "node.started" => Ok(RunEventKind::NodeStarted),
            "node.succeeded" => Ok(RunEventKind::NodeSucceeded),
            "node.failed" => Ok(RunEventKind::NodeFailed),
            "run.succeeded" => Ok(RunEventKind::RunSucceeded),
            "run.failed" => Ok(RunEventKind::RunFailed),
            "run.canceled" => Ok(RunEventKind::RunCanceled),
            other => match other.strip_prefix("artifact.") {
                Some(kind) if !kind.is_empty() => Ok(RunEventKind::Artifact(kind.to_string())),
                _ => Err(format!("unknown event kind: {other}")),
            },
        }
    }
}

impl Serialize for RunEventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_name())
    }
}

impl<'de> Deserialize<'de> for RunEventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A committed event: `seq` is strictly increasing per run, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: RunId,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// Event input before sequence allocation.
#[derive(Debug, Clone)]
pub struct NewRunEvent {
    pub run_id: RunId,
    pub kind: RunEventKind,
    pub node_id: Option<String>,
}

impl NewRunEvent {
    pub fn run(run_id: RunId, kind: RunEventKind) -> Self {
        Self {
            run_id,
            kind,
            node_id: None,
        }
    }

    pub fn node(run_id: RunId, kind: RunEventKind, node_id: impl Into<String>) -> Self {
        Self {
            run_id,
            kind,
            node_id: Some(node_id.into()),
        }
    }
}
