//! Mock issue tracker for testing.

use crate::mock::{MockBehavior, MockControl};
use crate::traits::{
    Connector, ConnectorHealth, ConnectorResult, IssueTracker, RemediationRequest,
    TrackingReference,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub struct MockIssueTracker {
    name: String,
    counter: AtomicU64,
    created: RwLock<Vec<RemediationRequest>>,
    control: MockControl,
}

impl MockIssueTracker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            counter: AtomicU64::new(1),
            created: RwLock::new(Vec::new()),
            control: MockControl::default(),
        }
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        self.control.set(behavior).await;
    }

    /// Requests that resulted in an issue.
    pub async fn created(&self) -> Vec<RemediationRequest> {
        self.created.read().await.clone()
    }
}

#[async_trait]
impl Connector for MockIssueTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "issue_tracker"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(self.control.health().await)
    }
}

#[async_trait]
impl IssueTracker for MockIssueTracker {
    async fn create_remediation_issue(
        &self,
        request: RemediationRequest,
    ) -> ConnectorResult<TrackingReference> {
        self.control.check().await?;

        let number = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created.write().await.push(request);

        Ok(TrackingReference {
            id: number.to_string(),
            url: format!("https://issues.example.com/rootline/{}", number),
        })
    }
}
