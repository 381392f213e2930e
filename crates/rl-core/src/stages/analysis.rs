//! Analysis: log query generation, concurrent execution and aggregation.
//!
//! Individual query failures are recorded on the query and excluded from
//! aggregation. The stage fails only when every query failed.

use super::{call_reasoning, format_time_range, require, StageHandler, StageOutcome, StageReport};
use crate::error::StageError;
use crate::investigation::{
    AnalysisResult, InvestigationState, LogPattern, QueryError, QueryExecution, Stage,
    StageOutput,
};
use crate::prompts::{ANALYSIS_TEMPLATE, ANALYSIS_TEMPLATE_ID, SYSTEM_PROMPT};
use crate::schema::{parse_query_plan, QueryCandidate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use regex::Regex;
use rl_connectors::{
    ErrorKind, LogEntry, LogQueryClient, LogQueryRequest, ReasoningClient, ReasoningRequest,
    TimeRange,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const NO_LOG_GROUPS_NOTE: &str = "no log groups available for analysis";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Log queries in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_max_samples")]
    pub max_samples_per_query: usize,
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
}

fn default_max_queries() -> usize {
    5
}

fn default_concurrency() -> usize {
    4
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_max_samples() -> usize {
    10
}

fn default_max_patterns() -> usize {
    20
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            concurrency: default_concurrency(),
            query_timeout_ms: default_query_timeout_ms(),
            max_samples_per_query: default_max_samples(),
            max_patterns: default_max_patterns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedQuery {
    purpose: String,
    query_text: String,
    log_group: String,
}

pub struct AnalysisStage {
    reasoning: Arc<dyn ReasoningClient>,
    logs: Arc<dyn LogQueryClient>,
    reasoning_timeout: Duration,
    config: AnalysisConfig,
}

impl AnalysisStage {
    pub fn new(
        reasoning: Arc<dyn ReasoningClient>,
        logs: Arc<dyn LogQueryClient>,
        reasoning_timeout: Duration,
    ) -> Self {
        Self {
            reasoning,
            logs,
            reasoning_timeout,
            config: AnalysisConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Keeps candidates that target a known log group, up to `max_queries`.
    fn plan_queries(&self, candidates: Vec<QueryCandidate>, groups: &[String]) -> Vec<PlannedQuery> {
        let Some(default_group) = groups.first() else {
            return Vec::new();
        };

        let mut plan = Vec::new();
        for candidate in candidates {
            let log_group = match candidate.log_group.as_deref().map(str::trim) {
                Some(group) if !group.is_empty() => {
                    if !groups.iter().any(|g| g == group) {
                        warn!(log_group = %group, "Dropping query for unknown log group");
                        continue;
                    }
                    group.to_string()
                }
                _ => default_group.clone(),
            };
            plan.push(PlannedQuery {
                purpose: candidate.purpose.trim().to_string(),
                query_text: candidate.query_text.trim().to_string(),
                log_group,
            });
            if plan.len() == self.config.max_queries {
                break;
            }
        }
        plan
    }

    async fn execute(&self, query: PlannedQuery, time_range: TimeRange) -> (QueryExecution, Vec<LogEntry>) {
        let request = LogQueryRequest {
            log_group: query.log_group.clone(),
            query_text: query.query_text.clone(),
            time_range,
        };
        let timeout = Duration::from_millis(self.config.query_timeout_ms);

        let outcome = match tokio::time::timeout(timeout, self.logs.query(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(QueryError {
                kind: e.kind(),
                message: e.to_string(),
            }),
            Err(_) => Err(QueryError {
                kind: ErrorKind::Timeout,
                message: format!("query timed out after {}ms", self.config.query_timeout_ms),
            }),
        };

        match outcome {
            Ok(response) => {
                counter!("rootline_log_queries_total", "outcome" => "ok").increment(1);
                let mut matches = response.matches;
                matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                let matched_count = response.total_count.max(matches.len() as u64);
                let execution = QueryExecution {
                    purpose: query.purpose,
                    query_text: query.query_text,
                    log_group: query.log_group,
                    matched_count,
                    sample_entries: matches
                        .iter()
                        .take(self.config.max_samples_per_query)
                        .cloned()
                        .collect(),
                    error: None,
                };
                (execution, matches)
            }
            Err(error) => {
                counter!("rootline_log_queries_total", "outcome" => "error").increment(1);
                warn!(
                    log_group = %query.log_group,
                    kind = %error.kind,
                    error = %error.message,
                    "Log query failed"
                );
                let execution = QueryExecution {
                    purpose: query.purpose,
                    query_text: query.query_text,
                    log_group: query.log_group,
                    matched_count: 0,
                    sample_entries: Vec::new(),
                    error: Some(error),
                };
                (execution, Vec::new())
            }
        }
    }
}

#[async_trait]
impl StageHandler for AnalysisStage {
    fn stage(&self) -> Stage {
        Stage::Analysis
    }

    #[instrument(skip(self, state), fields(incident_id = %state.incident_id()))]
    async fn handle(&self, state: &InvestigationState) -> StageOutcome {
        let triage = require(&state.triage, "triage")?;
        let incident = &state.incident;
        let groups = &incident.candidate_log_groups;

        if groups.is_empty() {
            info!("No candidate log groups, skipping log analysis");
            return Ok(StageReport::new(StageOutput::Analysis(AnalysisResult {
                note: Some(NO_LOG_GROUPS_NOTE.to_string()),
                ..Default::default()
            })));
        }

        let request = ReasoningRequest::new(ANALYSIS_TEMPLATE_ID, SYSTEM_PROMPT, ANALYSIS_TEMPLATE)
            .with_variable("service", &incident.service)
            .with_variable("description", &incident.description)
            .with_variable("severity", triage.severity.as_str())
            .with_variable("time_range", format_time_range(&incident.time_range))
            .with_variable("log_groups", groups.join("\n"))
            .with_variable("max_queries", self.config.max_queries.to_string());

        let reply = call_reasoning(self.reasoning.as_ref(), request, self.reasoning_timeout).await?;
        let plan = self.plan_queries(parse_query_plan(&reply)?, groups);
        if plan.is_empty() {
            return Err(StageError::validation(
                "no generated query targets an available log group",
            ));
        }

        let time_range = incident.time_range;
        let executed: Vec<(QueryExecution, Vec<LogEntry>)> = stream::iter(plan)
            .map(|query| self.execute(query, time_range))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let total = executed.len();
        let failed = executed.iter().filter(|(e, _)| !e.succeeded()).count();
        if failed == total {
            let reasons: Vec<String> = executed
                .iter()
                .filter_map(|(e, _)| e.error.as_ref())
                .map(|err| err.message.clone())
                .collect();
            return Err(StageError::tool(format!(
                "all {} log queries failed: {}",
                total,
                reasons.join("; ")
            )));
        }

        let result = aggregate(executed, self.config.max_patterns);
        info!(
            queries = total,
            failed,
            matches = result.total_matches,
            patterns = result.patterns.len(),
            "Analysis complete"
        );
        Ok(StageReport::new(StageOutput::Analysis(result)))
    }
}

// ============================================================================
// Aggregation
// ============================================================================

struct PatternStats {
    frequency: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

fn aggregate(executed: Vec<(QueryExecution, Vec<LogEntry>)>, max_patterns: usize) -> AnalysisResult {
    let total = executed.len();
    let mut seen: HashSet<(String, DateTime<Utc>, String)> = HashSet::new();
    let mut groups: HashMap<String, PatternStats> = HashMap::new();
    let mut queries_executed = Vec::with_capacity(total);
    let mut unreturned = 0u64;

    for (execution, entries) in executed {
        if execution.succeeded() {
            unreturned += execution.matched_count.saturating_sub(entries.len() as u64);
        }
        for entry in entries {
            let key = (
                execution.log_group.clone(),
                entry.timestamp,
                entry.message.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            let template = normalize_template(&entry.message);
            let stats = groups.entry(template).or_insert(PatternStats {
                frequency: 0,
                first_seen: entry.timestamp,
                last_seen: entry.timestamp,
            });
            stats.frequency += 1;
            stats.first_seen = stats.first_seen.min(entry.timestamp);
            stats.last_seen = stats.last_seen.max(entry.timestamp);
        }
        queries_executed.push(execution);
    }

    let mut patterns: Vec<LogPattern> = groups
        .into_iter()
        .map(|(description, s)| LogPattern {
            description,
            frequency: s.frequency,
            first_seen: s.first_seen,
            last_seen: s.last_seen,
        })
        .collect();

    // keep the most frequent, then present them in first-seen order
    patterns.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.first_seen.cmp(&b.first_seen))
            .then_with(|| a.description.cmp(&b.description))
    });
    patterns.truncate(max_patterns);
    patterns.sort_by(|a, b| {
        a.first_seen
            .cmp(&b.first_seen)
            .then_with(|| a.description.cmp(&b.description))
    });

    let total_matches = seen.len() as u64 + unreturned;
    let failed = queries_executed.iter().filter(|q| !q.succeeded()).count();
    let note = (failed > 0).then(|| format!("{} of {} queries could not be executed", failed, total));
    debug!(patterns = patterns.len(), "Aggregated log patterns");

    AnalysisResult {
        queries_executed,
        patterns,
        total_matches,
        note,
    }
}

struct TemplateRules {
    timestamp: Regex,
    uuid: Regex,
    ip: Regex,
    hex: Regex,
    quoted: Regex,
    number: Regex,
    spaces: Regex,
}

fn template_rules() -> &'static TemplateRules {
    static INSTANCE: OnceLock<TemplateRules> = OnceLock::new();
    INSTANCE.get_or_init(|| TemplateRules {
        timestamp: Regex::new(
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        )
        .expect("timestamp pattern is valid"),
        uuid: Regex::new(
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        )
        .expect("uuid pattern is valid"),
        ip: Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b").expect("ip pattern is valid"),
        hex: Regex::new(r"\b0x[0-9a-fA-F]+\b|\b[0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*\d[0-9a-fA-F]*\b")
            .expect("hex pattern is valid"),
        quoted: Regex::new(r#""[^"]*"|'[^']*'"#).expect("quoted pattern is valid"),
        number: Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"),
        spaces: Regex::new(r"\s+").expect("whitespace pattern is valid"),
    })
}

/// Replaces variable parts of a log message with placeholders.
pub fn normalize_template(message: &str) -> String {
    let rules = template_rules();
    let text = rules.timestamp.replace_all(message, "<ts>");
    let text = rules.uuid.replace_all(&text, "<uuid>");
    let text = rules.ip.replace_all(&text, "<ip>");
    let text = rules.quoted.replace_all(&text, "<str>");
    let text = rules.hex.replace_all(&text, |caps: &regex::Captures| hex_or_word(&caps[0]));
    let text = rules.number.replace_all(&text, "<n>");
    rules.spaces.replace_all(text.trim(), " ").into_owned()
}

/// Hex ids are long or `0x`-prefixed; short words like "dead1" stay words.
fn hex_or_word(candidate: &str) -> String {
    if candidate.starts_with("0x") || candidate.len() >= 8 {
        "<hex>".to_string()
    } else {
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentEvent;
    use crate::investigation::{Severity, TriageAction, TriageResult};
    use chrono::Duration as ChronoDuration;
    use rl_connectors::{ConnectorError, MockLogQueryClient, MockReasoningClient};
    use serde_json::json;

    const APP: &str = "/aws/lambda/payment-service";
    const DB: &str = "/aws/rds/payments-db";

    fn state(groups: &[&str]) -> InvestigationState {
        let incident = IncidentEvent::from_chat("payment-service", "error rate is 15%")
            .with_log_groups(groups.iter().copied());
        let mut state = InvestigationState::new(incident, Utc::now() + ChronoDuration::minutes(5));
        state.triage = Some(TriageResult {
            severity: Severity::P2,
            action: TriageAction::Investigate,
            rationale: "elevated errors".into(),
        });
        state
    }

    fn analysis_of(report: StageReport) -> AnalysisResult {
        match report.output {
            StageOutput::Analysis(a) => a,
            other => panic!("unexpected output {:?}", other),
        }
    }

    async fn seeded_logs() -> Arc<MockLogQueryClient> {
        let logs = Arc::new(MockLogQueryClient::new("logs"));
        let now = Utc::now();
        let entries = (0..15)
            .map(|i| {
                LogEntry::new(
                    now - ChronoDuration::minutes(20 - i),
                    format!("ERROR Connection pool exhausted: {}/50 connections in use, request {}", 50, i),
                )
            })
            .chain((0..3).map(|i| {
                LogEntry::new(
                    now - ChronoDuration::minutes(25 - i),
                    format!("WARN slow query took {}ms", 900 + i),
                )
            }))
            .collect();
        logs.add_entries(APP, entries).await;
        logs
    }

    fn stage(reasoning: Arc<MockReasoningClient>, logs: Arc<MockLogQueryClient>) -> AnalysisStage {
        AnalysisStage::new(reasoning, logs, Duration::from_secs(5)).with_config(AnalysisConfig {
            query_timeout_ms: 100,
            ..Default::default()
        })
    }

    #[test]
    fn test_normalize_template() {
        assert_eq!(
            normalize_template("Connection pool exhausted: 50/50 connections in use"),
            "Connection pool exhausted: <n>/<n> connections in use"
        );
        assert_eq!(
            normalize_template(
                "2024-03-01T10:00:00Z request 3f2b8c1e-1d2a-4c3b-9e8f-0a1b2c3d4e5f from 10.0.0.12:443 failed"
            ),
            "<ts> request <uuid> from <ip> failed"
        );
        assert_eq!(
            normalize_template("user 'alice' hit   0xdeadbeef"),
            "user <str> hit <hex>"
        );
        assert_eq!(normalize_template("conn42 reset"), "conn<n> reset");
    }

    #[tokio::test]
    async fn test_no_log_groups_skips_reasoning() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        let logs = Arc::new(MockLogQueryClient::new("logs"));
        let result = analysis_of(stage(reasoning.clone(), logs).handle(&state(&[])).await.unwrap());

        assert!(result.queries_executed.is_empty());
        assert_eq!(result.note.as_deref(), Some(NO_LOG_GROUPS_NOTE));
        assert!(reasoning.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_finds_pool_exhaustion_pattern() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [
                    {"purpose": "errors", "query_text": "filter @message like /error/", "log_group": APP},
                    {"purpose": "pool", "query_text": "filter @message like /connection pool/", "log_group": APP}
                ]}),
            )
            .await;
        let logs = seeded_logs().await;

        let result = analysis_of(
            stage(reasoning, logs)
                .handle(&state(&[APP]))
                .await
                .unwrap(),
        );

        assert_eq!(result.queries_executed.len(), 2);
        assert!(result.queries_executed.iter().all(|q| q.matched_count == 15));
        // both queries hit the same 15 entries; dedup keeps one copy each
        assert_eq!(result.total_matches, 15);
        assert!(result.note.is_none());
        assert_eq!(result.patterns.len(), 1);
        assert!(result.patterns[0].description.contains("Connection pool exhausted"));
        assert_eq!(result.patterns[0].frequency, 15);

        let samples = &result.queries_executed[0].sample_entries;
        assert_eq!(samples.len(), 10);
        assert!(samples.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_patterns_ordered_by_first_seen() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [{"purpose": "all", "query_text": "fields @message"}]}),
            )
            .await;
        let logs = seeded_logs().await;

        let result = analysis_of(stage(reasoning, logs).handle(&state(&[APP])).await.unwrap());
        assert_eq!(result.patterns.len(), 2);
        assert!(result.patterns[0].description.starts_with("WARN slow query"));
        assert!(result.patterns[0].first_seen < result.patterns[1].first_seen);
        assert_eq!(result.queries_executed[0].log_group, APP);
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [
                    {"purpose": "app", "query_text": "filter @message like /error/", "log_group": APP},
                    {"purpose": "db", "query_text": "filter @message like /deadlock/", "log_group": DB}
                ]}),
            )
            .await;
        let logs = seeded_logs().await;
        logs.fail_group(DB, ConnectorError::AuthorizationDenied("rds logs".into()))
            .await;

        let result = analysis_of(
            stage(reasoning, logs)
                .handle(&state(&[APP, DB]))
                .await
                .unwrap(),
        );

        assert_eq!(result.failed_queries(), 1);
        assert_eq!(result.note.as_deref(), Some("1 of 2 queries could not be executed"));
        assert_eq!(result.total_matches, 15);
        let failed = &result.queries_executed[1];
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Tool);
        assert!(failed.sample_entries.is_empty());
    }

    #[tokio::test]
    async fn test_slow_query_times_out_individually() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [
                    {"purpose": "app", "query_text": "filter @message like /error/", "log_group": APP},
                    {"purpose": "db", "query_text": "fields @message", "log_group": DB}
                ]}),
            )
            .await;
        let logs = seeded_logs().await;
        logs.add_entries(DB, vec![LogEntry::new(Utc::now(), "checkpoint")]).await;
        logs.delay_group(DB, Duration::from_secs(2)).await;

        let result = analysis_of(
            stage(reasoning, logs)
                .handle(&state(&[APP, DB]))
                .await
                .unwrap(),
        );
        let slow = &result.queries_executed[1];
        assert_eq!(slow.error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert!(result.queries_executed[0].succeeded());
    }

    #[tokio::test]
    async fn test_all_queries_failing_is_essential() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [{"purpose": "db", "query_text": "fields @message", "log_group": DB}]}),
            )
            .await;
        let logs = Arc::new(MockLogQueryClient::new("logs"));

        let err = stage(reasoning, logs)
            .handle(&state(&[DB]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Tool);
        assert!(err.essential);
        assert!(err.message.contains("log group"));
    }

    #[tokio::test]
    async fn test_unknown_groups_dropped_and_plan_capped() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        let queries: Vec<_> = (0..8)
            .map(|i| json!({"purpose": format!("q{}", i), "query_text": "fields @message", "log_group": if i == 0 { "/made/up" } else { APP }}))
            .collect();
        reasoning
            .push_json(ANALYSIS_TEMPLATE_ID, json!({ "queries": queries }))
            .await;
        let logs = seeded_logs().await;

        let result = analysis_of(
            stage(reasoning, logs.clone())
                .handle(&state(&[APP]))
                .await
                .unwrap(),
        );
        assert_eq!(result.queries_executed.len(), 5);
        assert!(result.queries_executed.iter().all(|q| q.log_group == APP));
        assert_eq!(result.queries_executed[0].purpose, "q1");
        assert_eq!(logs.history().await.len(), 5);
    }

    #[tokio::test]
    async fn test_plan_with_only_unknown_groups_is_validation_error() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        reasoning
            .push_json(
                ANALYSIS_TEMPLATE_ID,
                json!({"queries": [{"purpose": "x", "query_text": "fields @message", "log_group": "/nope"}]}),
            )
            .await;
        let err = stage(reasoning, seeded_logs().await)
            .handle(&state(&[APP]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_total_matches_counts_unreturned_entries() {
        let now = Utc::now();
        let returned = vec![
            LogEntry::new(now, "ERROR timeout calling ledger"),
            LogEntry::new(now - ChronoDuration::seconds(1), "ERROR timeout calling ledger"),
        ];
        let execution = |purpose: &str, matched_count: u64| QueryExecution {
            purpose: purpose.into(),
            query_text: "fields @message".into(),
            log_group: APP.into(),
            matched_count,
            sample_entries: Vec::new(),
            error: None,
        };

        // second query repeats the first's entries and reports 40 it did not return
        let result = aggregate(
            vec![
                (execution("all", 2), returned.clone()),
                (execution("wide", 42), returned),
            ],
            20,
        );
        assert_eq!(result.total_matches, 42);
        assert_eq!(result.patterns[0].frequency, 2);
    }

    /// Log backend that records how many queries run at once.
    struct PeakTrackingLogs {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl rl_connectors::Connector for PeakTrackingLogs {
        fn name(&self) -> &str {
            "peak-tracking"
        }

        fn connector_type(&self) -> &str {
            "log_query"
        }

        async fn health_check(&self) -> rl_connectors::ConnectorResult<rl_connectors::ConnectorHealth> {
            Ok(rl_connectors::ConnectorHealth::Healthy)
        }
    }

    #[async_trait]
    impl LogQueryClient for PeakTrackingLogs {
        async fn query(
            &self,
            request: LogQueryRequest,
        ) -> rl_connectors::ConnectorResult<rl_connectors::LogQueryResponse> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(rl_connectors::LogQueryResponse {
                matches: vec![LogEntry::new(Utc::now(), format!("hit for {}", request.query_text))],
                total_count: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_queries_bounded_by_concurrency() {
        let reasoning = Arc::new(MockReasoningClient::new("llm"));
        let queries: Vec<_> = (0..8)
            .map(|i| json!({"purpose": format!("q{}", i), "query_text": format!("filter {}", i)}))
            .collect();
        reasoning
            .push_json(ANALYSIS_TEMPLATE_ID, json!({ "queries": queries }))
            .await;
        let logs = Arc::new(PeakTrackingLogs {
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            peak: std::sync::atomic::AtomicUsize::new(0),
        });

        let stage = AnalysisStage::new(reasoning, logs.clone(), Duration::from_secs(5)).with_config(
            AnalysisConfig {
                max_queries: 8,
                concurrency: 4,
                ..Default::default()
            },
        );
        let result = analysis_of(stage.handle(&state(&[APP])).await.unwrap());

        let peak = logs.peak.load(std::sync::atomic::Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight queries was {}", peak);
        assert!(peak > 1);
        let purposes: Vec<_> = result.queries_executed.iter().map(|q| q.purpose.as_str()).collect();
        assert_eq!(purposes, vec!["q0", "q1", "q2", "q3", "q4", "q5", "q6", "q7"]);
        assert!(result.queries_executed.iter().all(|q| q.succeeded()));
    }
}
