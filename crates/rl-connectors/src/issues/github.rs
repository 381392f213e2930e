//! GitHub issues as the remediation tracker.

use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{
    Connector, ConnectorConfig, ConnectorHealth, ConnectorResult, IssueTracker,
    RemediationRequest, TrackingReference,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssueConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

fn default_labels() -> Vec<String> {
    vec!["incident".to_string(), "remediation".to_string()]
}

#[derive(Serialize)]
struct CreateIssue<'a> {
    title: String,
    body: String,
    labels: &'a [String],
}

#[derive(Deserialize)]
struct CreatedIssue {
    number: u64,
    html_url: String,
}

pub struct GitHubIssueTracker {
    config: GitHubIssueConfig,
    client: HttpClient,
}

impl GitHubIssueTracker {
    pub fn new(config: GitHubIssueConfig) -> ConnectorResult<Self> {
        let connector = config
            .connector
            .clone()
            .with_header("Accept", "application/vnd.github+json")
            .with_header("User-Agent", "rootline");
        let client = HttpClient::with_rate_limit(
            connector,
            Some(RateLimitConfig {
                requests_per_minute: 30,
                burst_size: 5,
            }),
        )?;
        Ok(Self { config, client })
    }

    fn issue_body(request: &RemediationRequest) -> String {
        let mut body = format!(
            "Automated remediation proposal for incident `{}` on **{}**.\n\n### Root cause\n{}\n\n### Proposed steps\n",
            request.incident_id, request.service, request.root_cause
        );
        for (i, step) in request.steps.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, step));
        }
        body.push_str("\nThis change requires human approval before it is applied.\n");
        body
    }
}

#[async_trait]
impl Connector for GitHubIssueTracker {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "issue_tracker"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        let path = format!("repos/{}/{}", self.config.owner, self.config.repo);
        match self.client.get_json::<serde_json::Value>(&path).await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl IssueTracker for GitHubIssueTracker {
    #[instrument(skip(self, request), fields(incident_id = %request.incident_id, service = %request.service))]
    async fn create_remediation_issue(
        &self,
        request: RemediationRequest,
    ) -> ConnectorResult<TrackingReference> {
        let payload = CreateIssue {
            title: format!("[{}] Code fix: {}", request.service, truncate(&request.root_cause, 80)),
            body: Self::issue_body(&request),
            labels: &self.config.labels,
        };

        let path = format!("repos/{}/{}/issues", self.config.owner, self.config.repo);
        let created: CreatedIssue = self.client.post_json(&path, &payload).await?;

        info!(issue = created.number, "Remediation issue created");
        Ok(TrackingReference {
            id: created.number.to_string(),
            url: created.html_url,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
