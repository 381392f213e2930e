//! Connector trait definitions for Rootline.
//!
//! Every external collaborator the investigator talks to (the reasoning
//! service, the embedding service, the log backend and the issue tracker)
//! sits behind one of the traits in this module. Callers receive an explicit
//! `ConnectorResult` and branch on [`ConnectorError::kind`] rather than on
//! individual transport failures.

use crate::secure_string::SecureString;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request refused by model: {0}")]
    Refused(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Failure taxonomy shared by connectors, stages and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Output did not match the expected schema.
    Validation,
    /// An external call failed.
    Tool,
    /// A log group, document or other resource does not exist.
    NotFound,
    /// A call did not complete within its time limit.
    Timeout,
    /// The investigation deadline passed.
    BudgetExceeded,
}

impl ErrorKind {
    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Tool => "tool",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BudgetExceeded => "budget_exceeded",
        }
    }

    /// Whether a failure of this kind may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::Tool | ErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectorError {
    /// Classifies this error into the shared failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::NotFound(_) => ErrorKind::NotFound,
            ConnectorError::Timeout(_) => ErrorKind::Timeout,
            ConnectorError::InvalidResponse(_) | ConnectorError::Refused(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Tool,
        }
    }
}

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
    Unknown,
}

/// Configuration shared by HTTP-backed connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name/identifier.
    pub name: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum transport-level retries.
    pub max_retries: u32,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates a config with no authentication and conservative defaults.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            timeout_secs: 30,
            max_retries: 2,
            headers: HashMap::new(),
        }
    }

    /// Sets the authentication method.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Adds a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// API key sent in a named header.
    ApiKey {
        key: SecureString,
        header_name: String,
    },
    /// `Authorization: Bearer <token>`.
    BearerToken { token: SecureString },
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "reasoning", "log_query", "issue_tracker").
    fn connector_type(&self) -> &str;

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;
}

// ============================================================================
// Reasoning
// ============================================================================

/// A structured prompt for the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    /// Identifier of the stage template (e.g., "triage", "diagnosis").
    pub template_id: String,
    /// System instructions.
    pub system: String,
    /// Template body with `{{name}}` placeholders.
    pub template: String,
    /// Values substituted into the template.
    pub variables: BTreeMap<String, String>,
}

impl ReasoningRequest {
    /// Creates a request for a stage template.
    pub fn new(
        template_id: impl Into<String>,
        system: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            system: system.into(),
            template: template.into(),
            variables: BTreeMap::new(),
        }
    }

    /// Binds a template variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Renders the template with its variables substituted.
    ///
    /// Unknown placeholders are left untouched.
    pub fn render(&self) -> String {
        let mut rendered = self.template.clone();
        for (name, value) in &self.variables {
            rendered = rendered.replace(&format!("{{{{{}}}}}", name), value);
        }
        rendered
    }
}

/// Raw text returned by the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResponse {
    /// Response text, expected to contain the stage's JSON object.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Finish reason reported by the service, if any.
    pub finish_reason: Option<String>,
}

impl ReasoningResponse {
    /// Creates a response with the given content.
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

/// Client for the external LLM.
#[async_trait]
pub trait ReasoningClient: Connector {
    /// Sends one prompt and returns the raw response text.
    ///
    /// Refusals surface as [`ConnectorError::Refused`] and transport or
    /// deadline failures as [`ConnectorError::Timeout`] / `RequestFailed`.
    async fn complete(&self, request: ReasoningRequest) -> ConnectorResult<ReasoningResponse>;
}

// ============================================================================
// Embeddings
// ============================================================================

/// Client for the external embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text. The caller truncates to the model's input limit.
    async fn embed(&self, text: &str) -> ConnectorResult<Vec<f32>>;

    /// Embeds several texts. Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> ConnectorResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Fixed vector dimension of the model.
    fn dimension(&self) -> usize;

    /// Identifier of the model version producing the vectors.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Log queries
// ============================================================================

/// Time range for log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range between two instants.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering the last `minutes` up to now.
    pub fn last_minutes(minutes: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::minutes(minutes),
            end,
        }
    }

    /// Whether the instant falls inside the range (inclusive).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// A query against one log group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQueryRequest {
    pub log_group: String,
    pub query_text: String,
    pub time_range: TimeRange,
}

/// A single matched log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
}

impl LogEntry {
    /// Creates an entry without a stream name.
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            log_stream: None,
        }
    }
}

/// Matches returned by the log backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQueryResponse {
    pub matches: Vec<LogEntry>,
    /// Total matches reported by the backend; may exceed `matches.len()`.
    pub total_count: u64,
}

/// Client for the external log backend.
#[async_trait]
pub trait LogQueryClient: Connector {
    /// Runs a query. A missing log group is [`ConnectorError::NotFound`].
    async fn query(&self, request: LogQueryRequest) -> ConnectorResult<LogQueryResponse>;
}

// ============================================================================
// Issue tracking
// ============================================================================

/// A proposed remediation handed to the issue tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub incident_id: Uuid,
    pub service: String,
    pub root_cause: String,
    pub steps: Vec<String>,
}

/// Reference to the work item created for a remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReference {
    /// Tracker-specific identifier (e.g., issue number).
    pub id: String,
    /// Link to the work item.
    pub url: String,
}

/// Issue-tracking collaborator.
#[async_trait]
pub trait IssueTracker: Connector {
    /// Opens a work item for the remediation.
    async fn create_remediation_issue(
        &self,
        request: RemediationRequest,
    ) -> ConnectorResult<TrackingReference>;
}
