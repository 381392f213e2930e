//! Prompt templates for the reasoning service.
//!
//! Templates use `{{name}}` placeholders filled by
//! [`rl_connectors::ReasoningRequest::render`]. Template ids double as the
//! keys under which tests script mock replies.

pub const TRIAGE_TEMPLATE_ID: &str = "triage";
pub const TRIAGE_CORRECTION_TEMPLATE_ID: &str = "triage_correction";
pub const ANALYSIS_TEMPLATE_ID: &str = "analysis";
pub const DIAGNOSIS_TEMPLATE_ID: &str = "diagnosis";
pub const REMEDIATION_TEMPLATE_ID: &str = "remediation";

pub const SYSTEM_PROMPT: &str = "You are a site reliability engineer investigating a production \
incident. Answer with exactly one JSON object matching the requested schema and nothing else.";

pub const TRIAGE_TEMPLATE: &str = r#"Classify the incident below.

Service: {{service}}
Source: {{source}}
Description: {{description}}
Time range: {{time_range}}

Severity scale: P1 (customer-facing outage) to P4 (informational, no action).
Action: INVESTIGATE to run a full investigation, ESCALATE to investigate and
page a human immediately, IGNORE when nothing needs to be done.

Respond with:
{"severity": "P1|P2|P3|P4", "action": "INVESTIGATE|ESCALATE|IGNORE", "rationale": "<one sentence>"}"#;

pub const TRIAGE_CORRECTION_TEMPLATE: &str = r#"Your previous answer could not be used: {{violation}}

Previous answer:
{{previous}}

Classify the incident again.

Service: {{service}}
Description: {{description}}

Respond with ONLY this JSON object:
{"severity": "P1|P2|P3|P4", "action": "INVESTIGATE|ESCALATE|IGNORE", "rationale": "<one sentence>"}"#;

pub const ANALYSIS_TEMPLATE: &str = r#"Propose CloudWatch Logs Insights queries to gather evidence.

Service: {{service}}
Description: {{description}}
Severity: {{severity}}
Time range: {{time_range}}
Available log groups:
{{log_groups}}

Propose between 1 and {{max_queries}} queries. Use only the log groups listed
above. Filter terms go between slashes, e.g. `filter @message like /timeout/`.

Respond with:
{"queries": [{"purpose": "<why>", "query_text": "<query>", "log_group": "<one of the groups>"}]}"#;

pub const DIAGNOSIS_TEMPLATE: &str = r#"Determine the root cause of the incident.

Service: {{service}}
Description: {{description}}

Log analysis:
{{analysis}}

Organizational knowledge:
{{knowledge}}

Rules:
- Prefer the organizational knowledge above over generic reasoning.
- If knowledge and log evidence disagree, describe each disagreement in "conflicts".
- Cite only document ids listed under organizational knowledge. Never invent sources.
- If no knowledge is listed, say so in root_cause and leave kb_sources empty.
- evidence_refs are the bracketed pattern numbers from the log analysis.

Respond with:
{"root_cause": "<text>", "confidence": <0-100>, "kb_sources": [{"document_id": "<id>", "section_title": "<title>"}], "evidence_refs": [<n>], "conflicts": ["<text>"]}"#;

pub const REMEDIATION_TEMPLATE: &str = r#"Propose a remediation.

Service: {{service}}
Root cause: {{root_cause}}
Confidence: {{confidence}}

action_type must be one of: scale_resources, restart_service, rollback,
code_fix, manual_intervention.

Respond with:
{"action_type": "<type>", "steps": ["<step>", "..."]}"#;

/// Text inserted in place of retrieved knowledge when none is available.
pub const NO_KNOWLEDGE_CONTEXT: &str = "(none: no relevant knowledge found)";
