//! Configuration loading for the Rootline CLI.

use anyhow::{Context, Result};
use rl_connectors::secure_string::REDACTED;
use rl_connectors::{
    AuthConfig, ConnectorConfig, GitHubIssueConfig, OpenAiEmbeddingConfig, OpenAiReasoningConfig,
    SecureString,
};
use rl_core::knowledge::{CacheConfig, IngestionConfig, RetrievalConfig};
use rl_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables that override secrets from the config file.
pub const ENV_LLM_API_KEY: &str = "ROOTLINE_LLM_API_KEY";
pub const ENV_EMBEDDING_API_KEY: &str = "ROOTLINE_EMBEDDING_API_KEY";
pub const ENV_ISSUE_TOKEN: &str = "ROOTLINE_ISSUE_TOKEN";
pub const ENV_LOGS_API_KEY: &str = "ROOTLINE_LOGS_API_KEY";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning model.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding model used for the knowledge base.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Log-query gateway.
    #[serde(default)]
    pub logs: LogsConfig,

    /// Issue tracker receiving code-fix remediations. Hand-off is skipped when unset.
    #[serde(default)]
    pub issue_tracker: Option<IssueTrackerConfig>,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Replaces file secrets with values from the environment, where set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = SecureString::from_env(ENV_LLM_API_KEY) {
            self.llm.api_key = key;
        }
        if let Some(key) = SecureString::from_env(ENV_EMBEDDING_API_KEY) {
            self.embedding.api_key = key;
        }
        if let Some(key) = SecureString::from_env(ENV_LOGS_API_KEY) {
            self.logs.api_key = key;
        }
        if let (Some(tracker), Some(token)) = (
            self.issue_tracker.as_mut(),
            SecureString::from_env(ENV_ISSUE_TOKEN),
        ) {
            tracker.token = token;
        }
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();

        redact(&mut config.llm.api_key);
        redact(&mut config.embedding.api_key);
        redact(&mut config.logs.api_key);
        if let Some(tracker) = config.issue_tracker.as_mut() {
            redact(&mut tracker.token);
        }

        config
    }
}

fn redact(secret: &mut SecureString) {
    if !secret.is_empty() {
        *secret = SecureString::from(REDACTED);
    }
}

fn bearer(token: &SecureString) -> AuthConfig {
    if token.is_empty() {
        AuthConfig::None
    } else {
        AuthConfig::BearerToken {
            token: token.clone(),
        }
    }
}

/// Reasoning model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: SecureString,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Transport timeout; the orchestrator applies its own per-call timeout on top.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.1
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_llm_model(),
            api_key: SecureString::default(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn to_connector(&self) -> OpenAiReasoningConfig {
        OpenAiReasoningConfig {
            connector: ConnectorConfig::new("reasoning", &self.base_url)
                .with_auth(bearer(&self.api_key))
                .with_timeout_secs(self.timeout_secs),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_mode: true,
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub api_key: SecureString,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_embedding_timeout() -> u64 {
    15
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            api_key: SecureString::default(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn to_connector(&self) -> OpenAiEmbeddingConfig {
        OpenAiEmbeddingConfig {
            connector: ConnectorConfig::new("embedding", &self.base_url)
                .with_auth(bearer(&self.api_key))
                .with_timeout_secs(self.timeout_secs),
            model: self.model.clone(),
            dimension: self.dimension,
        }
    }
}

/// Log-query gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Base URL of the gateway, e.g. `https://logs.internal.example.com`.
    #[serde(default)]
    pub base_url: String,

    /// Sent in `api_key_header` when set.
    #[serde(default)]
    pub api_key: SecureString,

    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    #[serde(default = "default_logs_timeout")]
    pub timeout_secs: u64,
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

fn default_logs_timeout() -> u64 {
    30
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: SecureString::default(),
            api_key_header: default_api_key_header(),
            timeout_secs: default_logs_timeout(),
        }
    }
}

impl LogsConfig {
    pub fn to_connector(&self) -> ConnectorConfig {
        let auth = if self.api_key.is_empty() {
            AuthConfig::None
        } else {
            AuthConfig::ApiKey {
                key: self.api_key.clone(),
                header_name: self.api_key_header.clone(),
            }
        };
        ConnectorConfig::new("logs", &self.base_url)
            .with_auth(auth)
            .with_timeout_secs(self.timeout_secs)
    }
}

/// GitHub repository receiving remediation issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTrackerConfig {
    #[serde(default = "default_github_api")]
    pub base_url: String,

    pub owner: String,

    pub repo: String,

    #[serde(default)]
    pub token: SecureString,

    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_labels() -> Vec<String> {
    vec!["incident".to_string(), "remediation".to_string()]
}

impl IssueTrackerConfig {
    pub fn to_connector(&self) -> GitHubIssueConfig {
        GitHubIssueConfig {
            connector: ConnectorConfig::new("github", &self.base_url)
                .with_auth(bearer(&self.token)),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Knowledge base configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// YAML manifest listing the documents to ingest at startup.
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Where investigation records are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to the platform data directory.
    #[serde(default)]
    pub investigations_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_investigations_dir(&self) -> PathBuf {
        if let Some(dir) = &self.investigations_dir {
            return dir.clone();
        }
        match directories::ProjectDirs::from("com", "rootline", "rootline") {
            Some(dirs) => dirs.data_dir().join("investigations"),
            None => PathBuf::from(".rootline/investigations"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Converts to the observability settings; `verbose` forces debug.
    pub fn to_observability(&self, verbose: bool) -> rl_observability::LoggingConfig {
        let level = if verbose {
            tracing::Level::DEBUG
        } else {
            self.level.parse().unwrap_or(tracing::Level::INFO)
        };
        let format = self.format.parse().unwrap_or_default();
        rl_observability::LoggingConfig::default()
            .with_level(level)
            .with_format(format)
    }
}
