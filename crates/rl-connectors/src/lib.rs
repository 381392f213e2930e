//! # rl-connectors
//!
//! Connectors for the external services a Rootline investigation depends on:
//! the reasoning model, the embedding model, the log backend and the issue
//! tracker.
//!
//! Each service is described by a trait in [`traits`] and ships with an HTTP
//! implementation and a scriptable mock.

pub mod embedding;
pub mod http;
pub mod issues;
pub mod logs;
pub mod mock;
pub mod reasoning;
pub mod secure_string;
pub mod traits;

pub use secure_string::SecureString;
pub use traits::{
    AuthConfig, Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    Embedder, ErrorKind, IssueTracker, LogEntry, LogQueryClient, LogQueryRequest,
    LogQueryResponse, ReasoningClient, ReasoningRequest, ReasoningResponse, RemediationRequest,
    TimeRange, TrackingReference,
};

pub use embedding::{MockEmbedder, OpenAiEmbedder, OpenAiEmbeddingConfig};
pub use issues::{GitHubIssueConfig, GitHubIssueTracker, MockIssueTracker};
pub use logs::{LogGatewayClient, MockLogQueryClient};
pub use mock::MockBehavior;
pub use reasoning::{MockReasoningClient, OpenAiReasoningClient, OpenAiReasoningConfig};
