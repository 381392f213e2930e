//! Scripted reasoning client for tests and offline runs.

use crate::mock::{MockBehavior, MockControl};
use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, ReasoningClient,
    ReasoningRequest, ReasoningResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(ConnectorError),
}

/// Record of a prompt for test verification.
#[derive(Debug, Clone)]
pub struct PromptRecord {
    pub template_id: String,
    pub rendered: String,
    pub timestamp: DateTime<Utc>,
}

/// Mock reasoning client.
///
/// Replies are queued per template id. When a queue holds a single reply it
/// is reused for every later call, so a test can script "always answer X".
pub struct MockReasoningClient {
    name: String,
    replies: RwLock<HashMap<String, VecDeque<ScriptedReply>>>,
    history: RwLock<Vec<PromptRecord>>,
    control: MockControl,
}

impl MockReasoningClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            replies: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            control: MockControl::default(),
        }
    }

    /// Queues a text reply for a template.
    pub async fn push_reply(&self, template_id: &str, content: impl Into<String>) {
        self.push(template_id, ScriptedReply::Text(content.into()))
            .await;
    }

    /// Queues a JSON reply for a template.
    pub async fn push_json(&self, template_id: &str, value: serde_json::Value) {
        self.push_reply(template_id, value.to_string()).await;
    }

    /// Queues an error for a template.
    pub async fn push_error(&self, template_id: &str, error: ConnectorError) {
        self.push(template_id, ScriptedReply::Error(error)).await;
    }

    async fn push(&self, template_id: &str, reply: ScriptedReply) {
        self.replies
            .write()
            .await
            .entry(template_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Sets the behavior for failure injection across all templates.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        self.control.set(behavior).await;
    }

    /// Prompts received so far.
    pub async fn history(&self) -> Vec<PromptRecord> {
        self.history.read().await.clone()
    }

    /// Number of prompts received for one template.
    pub async fn calls_for(&self, template_id: &str) -> usize {
        self.history
            .read()
            .await
            .iter()
            .filter(|r| r.template_id == template_id)
            .count()
    }
}

#[async_trait]
impl Connector for MockReasoningClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "reasoning"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(self.control.health().await)
    }
}

#[async_trait]
impl ReasoningClient for MockReasoningClient {
    async fn complete(&self, request: ReasoningRequest) -> ConnectorResult<ReasoningResponse> {
        self.history.write().await.push(PromptRecord {
            template_id: request.template_id.clone(),
            rendered: request.render(),
            timestamp: Utc::now(),
        });

        self.control.check().await?;

        let reply = {
            let mut replies = self.replies.write().await;
            match replies.get_mut(&request.template_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(ScriptedReply::Text(content)) => Ok(ReasoningResponse::new(content, "mock-model")),
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(ConnectorError::InvalidResponse(format!(
                "no scripted reply for template '{}'",
                request.template_id
            ))),
        }
    }
}
