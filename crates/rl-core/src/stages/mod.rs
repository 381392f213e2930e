//! Stage handlers of the investigation pipeline.
//!
//! A handler reads the state accumulated so far and returns its own section.
//! It never writes to the state: the orchestrator applies the returned
//! [`StageOutput`] and owns retries, degradation and failure.

pub mod analysis;
pub mod diagnosis;
pub mod remediation;
pub mod triage;

use crate::error::StageError;
use crate::investigation::{InvestigationState, Stage, StageOutput};
use async_trait::async_trait;
use rl_connectors::{ReasoningClient, ReasoningRequest, TimeRange};
use std::time::Duration;
use tracing::debug;

pub use analysis::{AnalysisConfig, AnalysisStage};
pub use diagnosis::{DiagnosisConfig, DiagnosisStage};
pub use remediation::RemediationStage;
pub use triage::TriageStage;

/// A produced section plus non-essential failures that were absorbed while
/// producing it.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub output: StageOutput,
    pub recorded_errors: Vec<StageError>,
}

impl StageReport {
    pub fn new(output: StageOutput) -> Self {
        Self {
            output,
            recorded_errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: StageError) -> Self {
        self.recorded_errors.push(error);
        self
    }
}

pub type StageOutcome = Result<StageReport, StageError>;

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// Runs the stage once.
    async fn handle(&self, state: &InvestigationState) -> StageOutcome;

    /// Produces a reduced result after a non-essential failure exhausted its
    /// retries. Stages without a degraded mode return the error unchanged.
    async fn degrade(&self, _state: &InvestigationState, error: &StageError) -> StageOutcome {
        Err(error.clone())
    }
}

/// Sends one reasoning request under a timeout and returns the reply text.
pub(crate) async fn call_reasoning(
    client: &dyn ReasoningClient,
    request: ReasoningRequest,
    timeout: Duration,
) -> Result<String, StageError> {
    let template_id = request.template_id.clone();
    match tokio::time::timeout(timeout, client.complete(request)).await {
        Ok(Ok(response)) => {
            debug!(template = %template_id, chars = response.content.len(), "Reasoning reply");
            Ok(response.content)
        }
        Ok(Err(e)) => Err(StageError::from(e)),
        Err(_) => Err(StageError::timeout(format!(
            "reasoning call '{}' timed out after {}s",
            template_id,
            timeout.as_secs_f64()
        ))),
    }
}

/// Section written by an earlier stage, or a validation error if missing.
pub(crate) fn require<'a, T>(section: &'a Option<T>, name: &str) -> Result<&'a T, StageError> {
    section
        .as_ref()
        .ok_or_else(|| StageError::validation(format!("{} result is missing", name)).final_attempt())
}

pub(crate) fn format_time_range(range: &TimeRange) -> String {
    format!("{} to {}", range.start.to_rfc3339(), range.end.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_connectors::{ConnectorError, ErrorKind, MockBehavior, MockReasoningClient};

    fn request() -> ReasoningRequest {
        ReasoningRequest::new("triage", "system", "hello")
    }

    #[tokio::test]
    async fn test_call_reasoning_returns_content() {
        let client = MockReasoningClient::new("llm");
        client.push_reply("triage", "{}").await;
        let reply = call_reasoning(&client, request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "{}");
    }

    #[tokio::test]
    async fn test_call_reasoning_timeout() {
        let client = MockReasoningClient::new("llm");
        client.push_reply("triage", "{}").await;
        client
            .set_behavior(MockBehavior::Slow(Duration::from_millis(200)))
            .await;
        let err = call_reasoning(&client, request(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_call_reasoning_refusal_is_validation() {
        let client = MockReasoningClient::new("llm");
        client
            .push_error("triage", ConnectorError::Refused("policy".into()))
            .await;
        let err = call_reasoning(&client, request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_require_missing_section() {
        let missing: Option<u8> = None;
        let err = require(&missing, "triage").unwrap_err();
        assert!(!err.retryable);
    }
}
