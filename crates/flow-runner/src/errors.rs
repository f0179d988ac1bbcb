use thiserror::Error;

use flow_model::ModelError;
use node_registry::StepError;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("step '{node_id}' failed: {source}")]
    Step {
        node_id: String,
        #[source]
        source: StepError,
    },

    #[error("unknown subflow: {0}")]
    UnknownSubflow(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("variable '{0}' is not a list")]
    NotAList(String),

    #[error("run canceled")]
    Canceled,
}
