use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("Edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("Cycle detected in default-edge graph involving node: {0}")]
    CycleDetected(String),

    #[error("Unknown subflow: {0}")]
    UnknownSubflow(String),
}
