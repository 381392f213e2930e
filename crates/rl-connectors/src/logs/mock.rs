//! In-memory log backend for tests.
//!
//! Queries are matched with a tiny subset of Logs Insights syntax: every
//! `/regex-free literal/` or `"quoted"` term in the query must appear in the
//! message (case-insensitive). A query with no terms matches everything in
//! the time range.

use crate::mock::{MockBehavior, MockControl};
use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, LogEntry, LogQueryClient,
    LogQueryRequest, LogQueryResponse,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Mock log-query client.
pub struct MockLogQueryClient {
    name: String,
    groups: RwLock<HashMap<String, Vec<LogEntry>>>,
    group_failures: RwLock<HashMap<String, ConnectorError>>,
    group_latency: RwLock<HashMap<String, Duration>>,
    history: RwLock<Vec<LogQueryRequest>>,
    control: MockControl,
}

impl MockLogQueryClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: RwLock::new(HashMap::new()),
            group_failures: RwLock::new(HashMap::new()),
            group_latency: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            control: MockControl::default(),
        }
    }

    /// Adds entries to a log group, creating it if needed.
    pub async fn add_entries(&self, log_group: &str, entries: Vec<LogEntry>) {
        self.groups
            .write()
            .await
            .entry(log_group.to_string())
            .or_default()
            .extend(entries);
    }

    /// Makes every query against `log_group` fail with `error`.
    pub async fn fail_group(&self, log_group: &str, error: ConnectorError) {
        self.group_failures
            .write()
            .await
            .insert(log_group.to_string(), error);
    }

    /// Delays every query against `log_group`.
    pub async fn delay_group(&self, log_group: &str, latency: Duration) {
        self.group_latency
            .write()
            .await
            .insert(log_group.to_string(), latency);
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        self.control.set(behavior).await;
    }

    /// Queries received so far.
    pub async fn history(&self) -> Vec<LogQueryRequest> {
        self.history.read().await.clone()
    }
}

/// Extracts `/literal/` and `"literal"` terms from a query.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for delimiter in ['/', '"'] {
        let parts: Vec<&str> = query.split(delimiter).collect();
        // odd indices sit between a pair of delimiters
        for part in parts.iter().skip(1).step_by(2).take(parts.len() / 2) {
            let term = part.trim();
            if !term.is_empty() {
                terms.push(term.to_lowercase());
            }
        }
    }
    terms
}

#[async_trait]
impl Connector for MockLogQueryClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "log_query"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(self.control.health().await)
    }
}

#[async_trait]
impl LogQueryClient for MockLogQueryClient {
    async fn query(&self, request: LogQueryRequest) -> ConnectorResult<LogQueryResponse> {
        self.history.write().await.push(request.clone());
        self.control.check().await?;

        let latency = self
            .group_latency
            .read()
            .await
            .get(&request.log_group)
            .copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.group_failures.read().await.get(&request.log_group) {
            return Err(error.clone());
        }

        let groups = self.groups.read().await;
        let entries = groups.get(&request.log_group).ok_or_else(|| {
            ConnectorError::NotFound(format!("log group {}", request.log_group))
        })?;

        let terms = query_terms(&request.query_text);
        let matches: Vec<LogEntry> = entries
            .iter()
            .filter(|e| request.time_range.contains(e.timestamp))
            .filter(|e| {
                let message = e.message.to_lowercase();
                terms.iter().all(|t| message.contains(t.as_str()))
            })
            .cloned()
            .collect();

        Ok(LogQueryResponse {
            total_count: matches.len() as u64,
            matches,
        })
    }
}
