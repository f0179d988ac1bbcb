use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("No active recording")]
    NoActiveFlow,

    #[error("Session not accepting steps")]
    NotAcceptingSteps,

    #[error("Tab channel error: {0}")]
    Channel(String),
}
