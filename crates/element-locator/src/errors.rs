use thiserror::Error;

/// Locator transport errors. "Element not found" is not an error: the
/// resolver returns `None` and callers convert that into a typed step
/// failure with an actionable message.
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    #[error("Frame bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),
}
