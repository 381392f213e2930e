//! Remediation: action proposal, approval gating and issue hand-off.

use super::{call_reasoning, require, StageHandler, StageOutcome, StageReport};
use crate::error::StageError;
use crate::investigation::{
    InvestigationState, RemediationAction, RemediationResult, Stage, StageOutput,
};
use crate::prompts::{REMEDIATION_TEMPLATE, REMEDIATION_TEMPLATE_ID, SYSTEM_PROMPT};
use crate::risk;
use crate::schema::parse_remediation;
use async_trait::async_trait;
use rl_connectors::{IssueTracker, ReasoningClient, ReasoningRequest, RemediationRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RemediationStage {
    reasoning: Arc<dyn ReasoningClient>,
    tracker: Option<Arc<dyn IssueTracker>>,
    reasoning_timeout: Duration,
    handoff_timeout: Duration,
}

impl RemediationStage {
    pub fn new(reasoning: Arc<dyn ReasoningClient>, reasoning_timeout: Duration) -> Self {
        Self {
            reasoning,
            tracker: None,
            reasoning_timeout,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }

    /// Hands `code_fix` proposals to an issue tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    /// Best-effort: failures come back as a non-essential error.
    async fn hand_off(
        &self,
        tracker: &dyn IssueTracker,
        request: RemediationRequest,
    ) -> Result<rl_connectors::TrackingReference, StageError> {
        match tokio::time::timeout(self.handoff_timeout, tracker.create_remediation_issue(request))
            .await
        {
            Ok(Ok(reference)) => Ok(reference),
            Ok(Err(e)) => Err(StageError::new(e.kind(), format!("issue hand-off failed: {}", e))
                .non_essential()),
            Err(_) => Err(StageError::timeout(format!(
                "issue hand-off timed out after {}s",
                self.handoff_timeout.as_secs_f64()
            ))
            .non_essential()),
        }
    }
}

#[async_trait]
impl StageHandler for RemediationStage {
    fn stage(&self) -> Stage {
        Stage::Remediation
    }

    #[instrument(skip(self, state), fields(incident_id = %state.incident_id()))]
    async fn handle(&self, state: &InvestigationState) -> StageOutcome {
        let diagnosis = require(&state.diagnosis, "diagnosis")?;
        let incident = &state.incident;

        let request =
            ReasoningRequest::new(REMEDIATION_TEMPLATE_ID, SYSTEM_PROMPT, REMEDIATION_TEMPLATE)
                .with_variable("service", &incident.service)
                .with_variable("root_cause", &diagnosis.root_cause)
                .with_variable("confidence", diagnosis.confidence.to_string());

        let reply = call_reasoning(self.reasoning.as_ref(), request, self.reasoning_timeout).await?;
        let draft = parse_remediation(&reply)?;
        let assessment = risk::assess(draft.action_type);

        let mut result = RemediationResult {
            action_type: draft.action_type,
            steps: draft.steps,
            requires_approval: assessment.requires_approval,
            risk_level: assessment.level,
            tracking_reference: None,
            handoff_note: None,
        };
        let mut absorbed = None;

        if result.action_type == RemediationAction::CodeFix {
            match &self.tracker {
                Some(tracker) => {
                    let handoff = RemediationRequest {
                        incident_id: incident.incident_id,
                        service: incident.service.clone(),
                        root_cause: diagnosis.root_cause.clone(),
                        steps: result.steps.clone(),
                    };
                    match self.hand_off(tracker.as_ref(), handoff).await {
                        Ok(reference) => {
                            info!(tracking_id = %reference.id, "Code fix handed off");
                            result.tracking_reference = Some(reference);
                        }
                        Err(e) => {
                            warn!(error = %e, "Code fix hand-off failed");
                            result.handoff_note =
                                Some("code fix could not be handed off to issue tracking".into());
                            absorbed = Some(e);
                        }
                    }
                }
                None => {
                    result.handoff_note =
                        Some("issue tracking is not configured; code fix was not handed off".into());
                }
            }
        }

        info!(
            action = %result.action_type,
            risk = %result.risk_level,
            requires_approval = result.requires_approval,
            "Remediation proposed"
        );
        let report = StageReport::new(StageOutput::Remediation(result));
        Ok(match absorbed {
            Some(e) => report.with_error(e),
            None => report,
        })
    }
}
