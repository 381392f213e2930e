//! Investigation orchestrator.
//!
//! Drives one incident through the fixed pipeline
//!
//! ```text
//! TRIAGE ─► ANALYSIS ─► DIAGNOSIS ─► REMEDIATION ─► COMPLETE
//!    │          │            │             │
//!    └──────────┴────────────┴─────────────┴──────► FAILED
//!    └─ IGNORE ─────────────────────────────────────► COMPLETE
//! ```
//!
//! and owns the retry policy: a retryable stage error is retried with
//! backoff up to `max_retries` times, a non-essential error that survives
//! its retries degrades the stage, and an essential one fails the run. The
//! deadline is checked before every attempt; a stage that has started is
//! allowed to finish, bounded only by the timeouts of its own calls.

use crate::error::{OrchestratorError, OrchestratorResult, StageError};
use crate::incident::IncidentEvent;
use crate::investigation::{InvestigationPhase, InvestigationState, Stage, StageOutput, TriageAction};
use crate::knowledge::KnowledgeRetriever;
use crate::repository::InvestigationRepository;
use crate::retry::RetryConfig;
use crate::stages::{
    AnalysisConfig, AnalysisStage, DiagnosisConfig, DiagnosisStage, RemediationStage,
    StageHandler, StageReport, TriageStage,
};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rl_connectors::{IssueTracker, LogQueryClient, ReasoningClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Wall-clock budget callers use to derive a deadline.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    /// Per-call timeout for the reasoning service.
    #[serde(default = "default_reasoning_timeout_ms")]
    pub reasoning_timeout_ms: u64,
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
    /// Retries per stage after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,
}

fn default_budget_ms() -> u64 {
    300_000
}

fn default_reasoning_timeout_ms() -> u64 {
    60_000
}

fn default_handoff_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            reasoning_timeout_ms: default_reasoning_timeout_ms(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            analysis: AnalysisConfig::default(),
            diagnosis: DiagnosisConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            ..Default::default()
        }
    }

    /// Absolute deadline `budget_ms` after `start`.
    pub fn deadline_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let budget = chrono::Duration::milliseconds(self.budget_ms.min(i64::MAX as u64) as i64);
        start + budget
    }
}

/// External services the default stage handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub logs: Arc<dyn LogQueryClient>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub tracker: Option<Arc<dyn IssueTracker>>,
}

/// One handler per pipeline stage.
#[derive(Clone)]
pub struct StageSet {
    pub triage: Arc<dyn StageHandler>,
    pub analysis: Arc<dyn StageHandler>,
    pub diagnosis: Arc<dyn StageHandler>,
    pub remediation: Arc<dyn StageHandler>,
}

impl StageSet {
    /// Builds the standard handlers over the given collaborators.
    pub fn standard(collaborators: Collaborators, config: &OrchestratorConfig) -> Self {
        let reasoning_timeout = Duration::from_millis(config.reasoning_timeout_ms);
        let mut remediation = RemediationStage::new(collaborators.reasoning.clone(), reasoning_timeout)
            .with_handoff_timeout(Duration::from_millis(config.handoff_timeout_ms));
        if let Some(tracker) = collaborators.tracker {
            remediation = remediation.with_tracker(tracker);
        }

        Self {
            triage: Arc::new(TriageStage::new(collaborators.reasoning.clone(), reasoning_timeout)),
            analysis: Arc::new(
                AnalysisStage::new(
                    collaborators.reasoning.clone(),
                    collaborators.logs,
                    reasoning_timeout,
                )
                .with_config(config.analysis.clone()),
            ),
            diagnosis: Arc::new(
                DiagnosisStage::new(
                    collaborators.reasoning,
                    collaborators.retriever,
                    reasoning_timeout,
                )
                .with_config(config.diagnosis.clone()),
            ),
            remediation: Arc::new(remediation),
        }
    }

    fn handler(&self, stage: Stage) -> &dyn StageHandler {
        match stage {
            Stage::Triage => self.triage.as_ref(),
            Stage::Analysis => self.analysis.as_ref(),
            Stage::Diagnosis => self.diagnosis.as_ref(),
            Stage::Remediation => self.remediation.as_ref(),
        }
    }
}

/// Outcome of driving one stage to a conclusion.
enum StageConclusion {
    Produced { report: StageReport, attempt: u32 },
    Failed,
}

pub struct Orchestrator {
    stages: StageSet,
    repository: Arc<dyn InvestigationRepository>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        repository: Arc<dyn InvestigationRepository>,
        config: OrchestratorConfig,
    ) -> Self {
        let stages = StageSet::standard(collaborators, &config);
        Self::with_stages(stages, repository, config)
    }

    pub fn with_stages(
        stages: StageSet,
        repository: Arc<dyn InvestigationRepository>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            stages,
            repository,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn repository(&self) -> Arc<dyn InvestigationRepository> {
        self.repository.clone()
    }

    /// Runs the pipeline and persists the final state.
    pub async fn investigate(
        &self,
        incident: IncidentEvent,
        deadline: DateTime<Utc>,
    ) -> OrchestratorResult<InvestigationState> {
        let state = self.run(incident, deadline).await?;
        let replaced = self.repository.upsert(&state).await?;
        if replaced {
            info!(incident_id = %state.incident_id(), "Replaced previous investigation record");
        }
        Ok(state)
    }

    /// Re-runs a stored investigation's incident, replacing its record.
    pub async fn reinvestigate(
        &self,
        incident_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> OrchestratorResult<InvestigationState> {
        let previous = self
            .repository
            .get(incident_id)
            .await?
            .ok_or(OrchestratorError::InvestigationNotFound(incident_id))?;
        self.investigate(previous.incident, deadline).await
    }

    /// Runs the pipeline to a terminal phase without persisting.
    #[instrument(skip(self, incident), fields(incident_id = %incident.incident_id, service = %incident.service))]
    pub async fn run(
        &self,
        incident: IncidentEvent,
        deadline: DateTime<Utc>,
    ) -> OrchestratorResult<InvestigationState> {
        incident.validate()?;
        let mut state = InvestigationState::new(incident, deadline);
        info!(deadline = %state.deadline, "Investigation started");

        while let Some(stage) = state.phase.stage() {
            let (report, attempt) = match self.drive_stage(stage, &mut state).await? {
                StageConclusion::Produced { report, attempt } => (report, attempt),
                StageConclusion::Failed => break,
            };

            for absorbed in &report.recorded_errors {
                state.record_error(stage, absorbed, attempt);
            }
            let ignored = matches!(
                &report.output,
                StageOutput::Triage(t) if t.action == TriageAction::Ignore
            );
            state.apply(report.output)?;

            let next = if ignored {
                info!("Triage decided IGNORE, closing investigation");
                InvestigationPhase::Complete
            } else {
                stage.next_phase()
            };
            state.transition_to(next)?;
        }

        counter!("rootline_investigations_total", "outcome" => state.phase.as_str()).increment(1);
        match &state.failure {
            Some(failure) => warn!(
                stage = %failure.stage,
                kind = %failure.kind,
                error = %failure.message,
                "Investigation failed"
            ),
            None => info!(phase = %state.phase, errors = state.stage_errors.len(), "Investigation finished"),
        }
        Ok(state)
    }

    /// Attempts one stage until it produces a section, degrades, or fails.
    async fn drive_stage(
        &self,
        stage: Stage,
        state: &mut InvestigationState,
    ) -> OrchestratorResult<StageConclusion> {
        let handler = self.stages.handler(stage);
        let retry = self.config.retry();
        let mut attempt: u32 = 1;

        loop {
            if remaining_budget(state).is_none() {
                let error = StageError::budget_exceeded(format!(
                    "deadline passed before {} attempt {}",
                    stage, attempt
                ));
                state.record_error(stage, &error, attempt);
                state.fail(stage, &error)?;
                return Ok(StageConclusion::Failed);
            }

            counter!("rootline_stage_attempts_total", "stage" => stage.as_str()).increment(1);
            let started = Instant::now();
            let outcome = handler.handle(state).await;
            histogram!("rootline_stage_duration_seconds", "stage" => stage.as_str())
                .record(started.elapsed().as_secs_f64());

            let error = match outcome {
                Ok(report) => return Ok(StageConclusion::Produced { report, attempt }),
                Err(error) => error,
            };

            counter!(
                "rootline_stage_failures_total",
                "stage" => stage.as_str(),
                "kind" => error.kind.as_str()
            )
            .increment(1);
            state.record_error(stage, &error, attempt);

            if error.retryable && attempt < retry.max_attempts() {
                let delay = retry.delay_for(attempt - 1);
                warn!(
                    stage = %stage,
                    attempt,
                    kind = %error.kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.message,
                    "Stage attempt failed, retrying"
                );
                if let Some(remaining) = remaining_budget(state) {
                    tokio::time::sleep(delay.min(remaining)).await;
                }
                attempt += 1;
                continue;
            }

            if !error.essential {
                warn!(stage = %stage, error = %error.message, "Degrading stage after non-essential failure");
                match handler.degrade(state, &error).await {
                    Ok(report) => return Ok(StageConclusion::Produced { report, attempt }),
                    Err(degrade_error) => {
                        if degrade_error != error {
                            state.record_error(stage, &degrade_error, attempt);
                        }
                        state.fail(stage, &degrade_error)?;
                        return Ok(StageConclusion::Failed);
                    }
                }
            }

            state.fail(stage, &error)?;
            return Ok(StageConclusion::Failed);
        }
    }
}

/// Time left before the deadline, or `None` once it has passed.
fn remaining_budget(state: &InvestigationState) -> Option<Duration> {
    let now = Utc::now();
    if state.deadline_exceeded(now) {
        return None;
    }
    (state.deadline - now).to_std().ok()
}
