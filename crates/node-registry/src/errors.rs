//! Step error taxonomy.
//!
//! Validation errors are structural and never retried. Resolution and
//! executor errors are retried only when the node declares a retry
//! policy. Control errors signal a data/version mismatch and are fatal.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StepError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Resolution(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Unsupported control: {0}")]
    Control(String),

    #[error("Canceled")]
    Canceled,
}

impl StepError {
    /// Whether a declared retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepError::Resolution(_) | StepError::Executor(_) | StepError::Assertion(_)
        )
    }
}

/// Result of a handler's pure precondition check.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn require(&mut self, condition: bool, message: &str) {
        if !condition {
            self.errors.push(message.to_string());
        }
    }

    pub fn into_step_result(self) -> Result<(), StepError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(StepError::Validation(self.errors))
        }
    }
}
