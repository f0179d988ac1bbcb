use thiserror::Error;

/// Transport-level executor failures. Action-level failures are reported
/// in-band via `ToolOutput::is_error`.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown tab: {0}")]
    UnknownTab(i64),

    #[error("Executor transport error: {0}")]
    Transport(String),
}
