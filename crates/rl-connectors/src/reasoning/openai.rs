//! Reasoning client for OpenAI-compatible chat-completions endpoints.

use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    ReasoningClient, ReasoningRequest, ReasoningResponse,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// OpenAI-compatible model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiReasoningConfig {
    /// Base connector configuration.
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Model name sent with every request.
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Ask the server to return a JSON object.
    #[serde(default = "default_true")]
    pub json_mode: bool,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Reasoning client backed by `/chat/completions`.
pub struct OpenAiReasoningClient {
    config: OpenAiReasoningConfig,
    client: HttpClient,
}

impl OpenAiReasoningClient {
    pub fn new(config: OpenAiReasoningConfig) -> ConnectorResult<Self> {
        let client =
            HttpClient::with_rate_limit(config.connector.clone(), Some(RateLimitConfig::default()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Connector for OpenAiReasoningClient {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "reasoning"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get_json::<serde_json::Value>("models").await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(ConnectorError::AuthenticationFailed(e)) => Ok(ConnectorHealth::Unhealthy(e)),
            Err(e) => Ok(ConnectorHealth::Degraded(e.to_string())),
        }
    }
}

#[async_trait]
impl ReasoningClient for OpenAiReasoningClient {
    #[instrument(skip(self, request), fields(template = %request.template_id, model = %self.config.model))]
    async fn complete(&self, request: ReasoningRequest) -> ConnectorResult<ReasoningResponse> {
        let user_prompt = request.render();
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: self.config.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response: ChatResponse = self.client.post_json("chat/completions", &body).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::InvalidResponse("response has no choices".into()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(ConnectorError::Refused(refusal));
        }
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ConnectorError::Refused("content filtered".into()));
        }

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ConnectorError::InvalidResponse("empty completion".into()))?;

        debug!(chars = content.len(), "Received completion");

        Ok(ReasoningResponse {
            content,
            model: response.model,
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 10,
            temperature: 0.0,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_with_refusal_parses() {
        let raw = r#"{"model":"m","choices":[{"message":{"content":null,"refusal":"no"},"finish_reason":"stop"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.refusal.as_deref(), Some("no"));
    }
}
