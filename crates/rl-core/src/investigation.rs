//! Investigation state and per-stage result types.
//!
//! [`InvestigationState`] is the single record threaded through one
//! orchestrator run. Each stage writes its own section exactly once; prior
//! sections are never rewritten.

use crate::error::{OrchestratorError, OrchestratorResult, StageError};
use crate::incident::IncidentEvent;
use crate::risk::RiskLevel;
use chrono::{DateTime, Utc};
use rl_connectors::{ErrorKind, LogEntry, TrackingReference};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

// ============================================================================
// Stages and phases
// ============================================================================

/// One stage of the fixed pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    Analysis,
    Diagnosis,
    Remediation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Triage => "triage",
            Stage::Analysis => "analysis",
            Stage::Diagnosis => "diagnosis",
            Stage::Remediation => "remediation",
        }
    }

    /// Phase in which this stage runs.
    pub fn phase(&self) -> InvestigationPhase {
        match self {
            Stage::Triage => InvestigationPhase::Triage,
            Stage::Analysis => InvestigationPhase::Analysis,
            Stage::Diagnosis => InvestigationPhase::Diagnosis,
            Stage::Remediation => InvestigationPhase::Remediation,
        }
    }

    /// Phase entered after this stage succeeds.
    pub fn next_phase(&self) -> InvestigationPhase {
        match self {
            Stage::Triage => InvestigationPhase::Analysis,
            Stage::Analysis => InvestigationPhase::Diagnosis,
            Stage::Diagnosis => InvestigationPhase::Remediation,
            Stage::Remediation => InvestigationPhase::Complete,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationPhase {
    Triage,
    Analysis,
    Diagnosis,
    Remediation,
    Complete,
    Failed,
}

impl InvestigationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationPhase::Triage => "triage",
            InvestigationPhase::Analysis => "analysis",
            InvestigationPhase::Diagnosis => "diagnosis",
            InvestigationPhase::Remediation => "remediation",
            InvestigationPhase::Complete => "complete",
            InvestigationPhase::Failed => "failed",
        }
    }

    /// Stage executed in this phase, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            InvestigationPhase::Triage => Some(Stage::Triage),
            InvestigationPhase::Analysis => Some(Stage::Analysis),
            InvestigationPhase::Diagnosis => Some(Stage::Diagnosis),
            InvestigationPhase::Remediation => Some(Stage::Remediation),
            InvestigationPhase::Complete | InvestigationPhase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestigationPhase::Complete | InvestigationPhase::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `target`.
    pub fn can_transition_to(&self, target: InvestigationPhase) -> bool {
        use InvestigationPhase::*;
        match (self, target) {
            (Complete | Failed, _) => false,
            (_, Failed) => true,
            (Triage, Analysis) | (Triage, Complete) => true,
            (Analysis, Diagnosis) => true,
            (Diagnosis, Remediation) => true,
            (Remediation, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InvestigationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Triage
// ============================================================================

/// Incident severity, P1 most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    P1,
    P2,
    P3,
    P4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
            Severity::P4 => "P4",
        }
    }

    /// Parses `P1`..`P4`, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "P1" => Some(Severity::P1),
            "P2" => Some(Severity::P2),
            "P3" => Some(Severity::P3),
            "P4" => Some(Severity::P4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the investigation should do after triage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageAction {
    Investigate,
    Escalate,
    Ignore,
}

impl TriageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriageAction::Investigate => "INVESTIGATE",
            TriageAction::Escalate => "ESCALATE",
            TriageAction::Ignore => "IGNORE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INVESTIGATE" => Some(TriageAction::Investigate),
            "ESCALATE" => Some(TriageAction::Escalate),
            "IGNORE" => Some(TriageAction::Ignore),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub severity: Severity,
    pub action: TriageAction,
    pub rationale: String,
}

impl TriageResult {
    pub fn is_escalated(&self) -> bool {
        self.action == TriageAction::Escalate
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Why a single log query produced no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
}

/// One executed log query and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecution {
    pub purpose: String,
    pub query_text: String,
    pub log_group: String,
    pub matched_count: u64,
    /// At most ten entries, most recent first.
    pub sample_entries: Vec<LogEntry>,
    pub error: Option<QueryError>,
}

impl QueryExecution {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A group of log messages sharing one normalized template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPattern {
    pub description: String,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub queries_executed: Vec<QueryExecution>,
    /// Stable-ordered by first-seen time.
    pub patterns: Vec<LogPattern>,
    /// Distinct entries across all queries, plus matches a backend counted
    /// but did not return (those cannot be deduplicated).
    pub total_matches: u64,
    /// User-visible statement about degraded or empty analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AnalysisResult {
    /// Text summary of the findings, used as retrieval and prompt context.
    pub fn summary(&self) -> String {
        if self.patterns.is_empty() {
            return format!("No log patterns found ({} matches).", self.total_matches);
        }
        let mut out = format!("{} matching log entries. Patterns:\n", self.total_matches);
        for (i, p) in self.patterns.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} (x{}, first {} last {})",
                i,
                p.description,
                p.frequency,
                p.first_seen.to_rfc3339(),
                p.last_seen.to_rfc3339()
            );
        }
        out
    }

    pub fn failed_queries(&self) -> usize {
        self.queries_executed.iter().filter(|q| !q.succeeded()).count()
    }
}

// ============================================================================
// Diagnosis
// ============================================================================

/// A knowledge citation backing a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbSource {
    pub document_id: Uuid,
    pub section_title: Option<String>,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub root_cause: String,
    /// 0 to 100.
    pub confidence: u8,
    /// Always a subset of the chunks retrieved for this diagnosis.
    pub kb_sources: Vec<KbSource>,
    /// Indices into `AnalysisResult::patterns`.
    pub evidence_refs: Vec<usize>,
    /// Disagreements between knowledge content and log evidence.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Set when no knowledge backed the diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_note: Option<String>,
}

// ============================================================================
// Remediation
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    ScaleResources,
    RestartService,
    Rollback,
    CodeFix,
    ManualIntervention,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationAction::ScaleResources => "scale_resources",
            RemediationAction::RestartService => "restart_service",
            RemediationAction::Rollback => "rollback",
            RemediationAction::CodeFix => "code_fix",
            RemediationAction::ManualIntervention => "manual_intervention",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "scale_resources" => Some(RemediationAction::ScaleResources),
            "restart_service" => Some(RemediationAction::RestartService),
            "rollback" => Some(RemediationAction::Rollback),
            "code_fix" => Some(RemediationAction::CodeFix),
            "manual_intervention" => Some(RemediationAction::ManualIntervention),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationResult {
    pub action_type: RemediationAction,
    pub steps: Vec<String>,
    /// Derived from the risk table, never from model output.
    pub requires_approval: bool,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_reference: Option<TrackingReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_note: Option<String>,
}

// ============================================================================
// State
// ============================================================================

/// Output of one stage, applied to the state by the orchestrator.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Triage(TriageResult),
    Analysis(AnalysisResult),
    Diagnosis(DiagnosisResult),
    Remediation(RemediationResult),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Triage(_) => Stage::Triage,
            StageOutput::Analysis(_) => Stage::Analysis,
            StageOutput::Diagnosis(_) => Stage::Diagnosis,
            StageOutput::Remediation(_) => Stage::Remediation,
        }
    }
}

/// A recorded stage failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub essential: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationState {
    pub incident: IncidentEvent,
    pub triage: Option<TriageResult>,
    pub analysis: Option<AnalysisResult>,
    pub diagnosis: Option<DiagnosisResult>,
    pub remediation: Option<RemediationResult>,
    pub stage_errors: Vec<StageErrorRecord>,
    pub deadline: DateTime<Utc>,
    pub phase: InvestigationPhase,
    pub failure: Option<FailureInfo>,
    /// User-visible degradation statements, in the order they occurred.
    pub notes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InvestigationState {
    pub fn new(incident: IncidentEvent, deadline: DateTime<Utc>) -> Self {
        Self {
            incident,
            triage: None,
            analysis: None,
            diagnosis: None,
            remediation: None,
            stage_errors: Vec::new(),
            deadline,
            phase: InvestigationPhase::Triage,
            failure: None,
            notes: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn incident_id(&self) -> Uuid {
        self.incident.incident_id
    }

    pub fn deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Moves the state machine, rejecting illegal transitions.
    pub fn transition_to(&mut self, target: InvestigationPhase) -> OrchestratorResult<()> {
        if !self.phase.can_transition_to(target) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.phase,
                to: target,
            });
        }
        self.phase = target;
        if target.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Writes a stage's section. Each section can be written once.
    pub fn apply(&mut self, output: StageOutput) -> OrchestratorResult<()> {
        let stage = output.stage();
        let written = match output {
            StageOutput::Triage(r) => write_once(&mut self.triage, r),
            StageOutput::Analysis(r) => {
                if let Some(note) = &r.note {
                    self.notes.push(note.clone());
                }
                write_once(&mut self.analysis, r)
            }
            StageOutput::Diagnosis(r) => {
                if let Some(note) = &r.knowledge_note {
                    self.notes.push(note.clone());
                }
                write_once(&mut self.diagnosis, r)
            }
            StageOutput::Remediation(r) => {
                if let Some(note) = &r.handoff_note {
                    self.notes.push(note.clone());
                }
                write_once(&mut self.remediation, r)
            }
        };
        if written {
            Ok(())
        } else {
            Err(OrchestratorError::SectionAlreadyWritten(stage))
        }
    }

    /// Appends a stage error to the ordered error log.
    pub fn record_error(&mut self, stage: Stage, error: &StageError, attempt: u32) {
        self.stage_errors.push(StageErrorRecord {
            stage,
            kind: error.kind,
            message: error.message.clone(),
            attempt,
            essential: error.essential,
            recorded_at: Utc::now(),
        });
    }

    /// Moves to `Failed`, keeping every section written so far.
    pub fn fail(&mut self, stage: Stage, error: &StageError) -> OrchestratorResult<()> {
        self.failure = Some(FailureInfo {
            stage,
            kind: error.kind,
            message: error.message.clone(),
        });
        self.transition_to(InvestigationPhase::Failed)
    }

    /// Errors recorded for one stage.
    pub fn errors_for(&self, stage: Stage) -> impl Iterator<Item = &StageErrorRecord> {
        self.stage_errors.iter().filter(move |e| e.stage == stage)
    }

    /// Human-readable report of the run.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Investigation {} for {} ({})",
            self.incident.incident_id, self.incident.service, self.phase
        );

        if let Some(failure) = &self.failure {
            let _ = writeln!(
                out,
                "Stopped during {}: {} error: {}",
                failure.stage, failure.kind, failure.message
            );
        }

        if let Some(t) = &self.triage {
            let _ = writeln!(
                out,
                "Triage: {} / {} - {}",
                t.severity, t.action, t.rationale
            );
        }
        if let Some(a) = &self.analysis {
            let _ = writeln!(
                out,
                "Analysis: {} queries, {} matches, {} patterns",
                a.queries_executed.len(),
                a.total_matches,
                a.patterns.len()
            );
        }
        if let Some(d) = &self.diagnosis {
            let _ = writeln!(
                out,
                "Diagnosis ({}% confidence): {}",
                d.confidence, d.root_cause
            );
            for source in &d.kb_sources {
                let _ = writeln!(
                    out,
                    "  source {} [{}] similarity {:.2}",
                    source.document_id,
                    source.section_title.as_deref().unwrap_or("-"),
                    source.similarity
                );
            }
            for conflict in &d.conflicts {
                let _ = writeln!(out, "  conflict: {}", conflict);
            }
        }
        if let Some(r) = &self.remediation {
            let approval = if r.requires_approval {
                "requires approval"
            } else {
                "no approval required"
            };
            let _ = writeln!(out, "Remediation: {} ({})", r.action_type, approval);
            for (i, step) in r.steps.iter().enumerate() {
                let _ = writeln!(out, "  {}. {}", i + 1, step);
            }
            if let Some(reference) = &r.tracking_reference {
                let _ = writeln!(out, "  tracked as {}", reference.url);
            }
        }
        for note in &self.notes {
            let _ = writeln!(out, "Note: {}", note);
        }
        out
    }
}

fn write_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}
