//! Boundary validation of reasoning output.
//!
//! Every stage expects one JSON object in the model's reply. This module
//! extracts it (tolerating code fences and surrounding prose), deserializes
//! it into a per-stage wire type, and validates it. Any mismatch is a typed
//! [`SchemaError`]; nothing is silently defaulted.

use crate::error::StageError;
use crate::investigation::{RemediationAction, Severity, TriageAction, TriageResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<SchemaError> for StageError {
    fn from(error: SchemaError) -> Self {
        StageError::validation(error.to_string())
    }
}

/// Finds the JSON object inside a model reply.
pub fn extract_json(text: &str) -> Result<&str, SchemaError> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if candidate.starts_with('{') {
                return Ok(candidate);
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&trimmed[start..=end]),
        _ => Err(SchemaError::NoJson),
    }
}

/// Extracts and deserializes a reply.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, SchemaError> {
    let json = extract_json(text)?;
    serde_json::from_str(json).map_err(|e| SchemaError::Malformed(e.to_string()))
}

fn non_empty(field: &'static str, value: String) -> Result<String, SchemaError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(SchemaError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

// ============================================================================
// Triage
// ============================================================================

#[derive(Debug, Deserialize)]
struct TriageWire {
    severity: String,
    action: String,
    rationale: String,
}

pub fn parse_triage(text: &str) -> Result<TriageResult, SchemaError> {
    let wire: TriageWire = parse_reply(text)?;
    let severity = Severity::parse(&wire.severity).ok_or_else(|| SchemaError::InvalidField {
        field: "severity",
        reason: format!("'{}' is not one of P1..P4", wire.severity),
    })?;
    let action = TriageAction::parse(&wire.action).ok_or_else(|| SchemaError::InvalidField {
        field: "action",
        reason: format!("'{}' is not INVESTIGATE, ESCALATE or IGNORE", wire.action),
    })?;
    Ok(TriageResult {
        severity,
        action,
        rationale: non_empty("rationale", wire.rationale)?,
    })
}

// ============================================================================
// Analysis
// ============================================================================

/// A log query proposed by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryCandidate {
    pub purpose: String,
    pub query_text: String,
    #[serde(default)]
    pub log_group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryPlanWire {
    queries: Vec<QueryCandidate>,
}

/// Parses `{"queries": [...]}`; at least one usable query is required.
pub fn parse_query_plan(text: &str) -> Result<Vec<QueryCandidate>, SchemaError> {
    let wire: QueryPlanWire = parse_reply(text)?;
    let queries: Vec<QueryCandidate> = wire
        .queries
        .into_iter()
        .filter(|q| !q.query_text.trim().is_empty())
        .collect();
    if queries.is_empty() {
        return Err(SchemaError::InvalidField {
            field: "queries",
            reason: "no query with non-empty query_text".to_string(),
        });
    }
    Ok(queries)
}

// ============================================================================
// Diagnosis
// ============================================================================

/// A citation as written by the model, before the retrieved-set filter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CitationWire {
    pub document_id: String,
    #[serde(default)]
    pub section_title: Option<String>,
}

/// Validated diagnosis fields prior to citation filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisDraft {
    pub root_cause: String,
    pub confidence: u8,
    pub kb_sources: Vec<CitationWire>,
    pub evidence_refs: Vec<usize>,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiagnosisWire {
    root_cause: String,
    confidence: f64,
    #[serde(default)]
    kb_sources: Vec<CitationWire>,
    #[serde(default)]
    evidence_refs: Vec<i64>,
    #[serde(default)]
    conflicts: Vec<String>,
}

pub fn parse_diagnosis(text: &str) -> Result<DiagnosisDraft, SchemaError> {
    let wire: DiagnosisWire = parse_reply(text)?;

    if !(0.0..=100.0).contains(&wire.confidence) {
        return Err(SchemaError::InvalidField {
            field: "confidence",
            reason: format!("{} is outside 0..=100", wire.confidence),
        });
    }

    Ok(DiagnosisDraft {
        root_cause: non_empty("root_cause", wire.root_cause)?,
        confidence: wire.confidence.round() as u8,
        kb_sources: wire.kb_sources,
        evidence_refs: wire
            .evidence_refs
            .into_iter()
            .filter_map(|i| usize::try_from(i).ok())
            .collect(),
        conflicts: wire
            .conflicts
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
    })
}

// ============================================================================
// Remediation
// ============================================================================

/// Validated remediation proposal. Any approval flag in the reply is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationDraft {
    pub action_type: RemediationAction,
    pub steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RemediationWire {
    action_type: String,
    steps: Vec<String>,
}

pub fn parse_remediation(text: &str) -> Result<RemediationDraft, SchemaError> {
    let wire: RemediationWire = parse_reply(text)?;
    let action_type =
        RemediationAction::parse(&wire.action_type).ok_or_else(|| SchemaError::InvalidField {
            field: "action_type",
            reason: format!("unknown action type '{}'", wire.action_type),
        })?;
    let steps: Vec<String> = wire
        .steps
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if steps.is_empty() {
        return Err(SchemaError::InvalidField {
            field: "steps",
            reason: "at least one step is required".to_string(),
        });
    }
    Ok(RemediationDraft { action_type, steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_from_prose() {
        let text = "Result: {\"a\": {\"b\": 2}} done";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn test_extract_none() {
        assert_eq!(extract_json("I cannot help"), Err(SchemaError::NoJson));
    }

    #[test]
    fn test_parse_triage() {
        let t = parse_triage(r#"{"severity":"p2","action":"investigate","rationale":"errors up"}"#)
            .unwrap();
        assert_eq!(t.severity, Severity::P2);
        assert_eq!(t.action, TriageAction::Investigate);
    }

    #[test]
    fn test_parse_triage_rejects_unknown_severity() {
        let err = parse_triage(r#"{"severity":"high","action":"IGNORE","rationale":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { field: "severity", .. }));
    }

    #[test]
    fn test_parse_triage_rejects_missing_field() {
        let err = parse_triage(r#"{"severity":"P1","action":"IGNORE"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn test_parse_query_plan_drops_blank_queries() {
        let plan = parse_query_plan(
            r#"{"queries":[{"purpose":"a","query_text":" "},{"purpose":"b","query_text":"filter /x/","log_group":"/g"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].log_group.as_deref(), Some("/g"));
    }

    #[test]
    fn test_parse_query_plan_requires_queries() {
        assert!(parse_query_plan(r#"{"queries":[]}"#).is_err());
    }

    #[test]
    fn test_parse_diagnosis_confidence_bounds() {
        let ok = parse_diagnosis(r#"{"root_cause":"pool","confidence":85}"#).unwrap();
        assert_eq!(ok.confidence, 85);
        assert!(ok.kb_sources.is_empty());

        let err = parse_diagnosis(r#"{"root_cause":"pool","confidence":140}"#).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { field: "confidence", .. }));
    }

    #[test]
    fn test_parse_diagnosis_drops_negative_refs() {
        let d = parse_diagnosis(
            r#"{"root_cause":"x","confidence":50,"evidence_refs":[0,-1,2],"conflicts":["", "runbook says 10 conns"]}"#,
        )
        .unwrap();
        assert_eq!(d.evidence_refs, vec![0, 2]);
        assert_eq!(d.conflicts, vec!["runbook says 10 conns"]);
    }

    #[test]
    fn test_parse_remediation_ignores_model_approval_flag() {
        let r = parse_remediation(
            r#"{"action_type":"rollback","steps":["revert"],"requires_approval":false}"#,
        )
        .unwrap();
        assert_eq!(r.action_type, RemediationAction::Rollback);
    }

    #[test]
    fn test_parse_remediation_requires_steps() {
        assert!(parse_remediation(r#"{"action_type":"rollback","steps":[]}"#).is_err());
        assert!(parse_remediation(r#"{"action_type":"reboot","steps":["x"]}"#).is_err());
    }
}
