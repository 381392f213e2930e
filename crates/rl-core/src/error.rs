//! Error types for the investigation pipeline.

use crate::investigation::{InvestigationPhase, Stage};
use rl_connectors::{ConnectorError, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stage failure, classified for the orchestrator's retry policy.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the failed call is essential to the stage.
    pub essential: bool,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl StageError {
    /// Creates an essential error whose retryability follows its kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            essential: true,
            retryable: kind.is_retryable(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tool, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    /// Classifies a connector failure.
    pub fn from_connector(error: &ConnectorError) -> Self {
        Self::new(error.kind(), error.to_string())
    }

    /// Marks the failing call as non-essential.
    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }

    /// Marks the error as final: the orchestrator will not retry it.
    pub fn final_attempt(mut self) -> Self {
        self.retryable = false;
        self
    }
}

impl From<ConnectorError> for StageError {
    fn from(error: ConnectorError) -> Self {
        Self::from_connector(&error)
    }
}

/// Internal orchestrator failures. These are bugs or storage faults, not
/// stage outcomes, and are surfaced to the caller instead of being recorded.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition {
        from: InvestigationPhase,
        to: InvestigationPhase,
    },

    #[error("Stage {0} already produced a result")]
    SectionAlreadyWritten(Stage),

    #[error("Investigation not found: {0}")]
    InvestigationNotFound(uuid::Uuid),

    #[error("Invalid incident: {0}")]
    InvalidIncident(#[from] crate::incident::IntakeError),

    #[error("Repository error: {0}")]
    Repository(#[from] crate::repository::RepositoryError),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connector_keeps_kind() {
        let err = StageError::from(ConnectorError::Timeout("60s".into()));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.retryable);
        assert!(err.essential);
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = StageError::from(ConnectorError::NotFound("group".into()));
        assert!(!err.retryable);
    }

    #[test]
    fn test_modifiers() {
        let err = StageError::validation("bad").non_essential().final_attempt();
        assert!(!err.essential);
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "validation error: bad");
    }
}
