//! Triage: severity and action classification.

use super::{call_reasoning, format_time_range, StageHandler, StageOutcome, StageReport};
use crate::error::StageError;
use crate::investigation::{InvestigationState, Severity, Stage, StageOutput, TriageAction};
use crate::prompts::{
    SYSTEM_PROMPT, TRIAGE_CORRECTION_TEMPLATE, TRIAGE_CORRECTION_TEMPLATE_ID, TRIAGE_TEMPLATE,
    TRIAGE_TEMPLATE_ID,
};
use crate::schema::parse_triage;
use async_trait::async_trait;
use rl_connectors::{ReasoningClient, ReasoningRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Longest previous reply echoed back in the corrective prompt.
const MAX_ECHOED_REPLY_CHARS: usize = 2_000;

pub struct TriageStage {
    client: Arc<dyn ReasoningClient>,
    timeout: Duration,
}

impl TriageStage {
    pub fn new(client: Arc<dyn ReasoningClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl StageHandler for TriageStage {
    fn stage(&self) -> Stage {
        Stage::Triage
    }

    #[instrument(skip(self, state), fields(incident_id = %state.incident_id()))]
    async fn handle(&self, state: &InvestigationState) -> StageOutcome {
        let incident = &state.incident;
        let request = ReasoningRequest::new(TRIAGE_TEMPLATE_ID, SYSTEM_PROMPT, TRIAGE_TEMPLATE)
            .with_variable("service", &incident.service)
            .with_variable("source", incident.source.as_str())
            .with_variable("description", &incident.description)
            .with_variable("time_range", format_time_range(&incident.time_range));

        let reply = call_reasoning(self.client.as_ref(), request, self.timeout).await?;

        let mut result = match parse_triage(&reply) {
            Ok(result) => result,
            Err(violation) => {
                warn!(error = %violation, "Triage reply rejected, re-prompting once");
                let previous: String = reply.chars().take(MAX_ECHOED_REPLY_CHARS).collect();
                let correction = ReasoningRequest::new(
                    TRIAGE_CORRECTION_TEMPLATE_ID,
                    SYSTEM_PROMPT,
                    TRIAGE_CORRECTION_TEMPLATE,
                )
                .with_variable("violation", violation.to_string())
                .with_variable("previous", previous)
                .with_variable("service", &incident.service)
                .with_variable("description", &incident.description);

                let retry_reply =
                    call_reasoning(self.client.as_ref(), correction, self.timeout).await?;
                parse_triage(&retry_reply)
                    .map_err(|e| StageError::from(e).final_attempt())?
            }
        };

        if result.severity == Severity::P4 && result.action != TriageAction::Ignore {
            info!(action = %result.action, "P4 incidents are never investigated, forcing IGNORE");
            result.action = TriageAction::Ignore;
        }

        info!(
            severity = %result.severity,
            action = %result.action,
            "Triage complete"
        );
        Ok(StageReport::new(StageOutput::Triage(result)))
    }
}
