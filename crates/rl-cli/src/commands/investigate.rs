//! Wiring for investigation commands.
//!
//! One connector set is built per process and passed down explicitly; the
//! knowledge store lives for the duration of the command and is filled from
//! the configured manifest.

use crate::config::AppConfig;
use crate::manifest::{IngestSummary, KnowledgeManifest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rl_connectors::{
    Embedder, GitHubIssueTracker, IssueTracker, LogGatewayClient, LogQueryClient, OpenAiEmbedder,
    OpenAiReasoningClient, ReasoningClient,
};
use rl_core::knowledge::{InMemoryKnowledgeStore, RetrievalCache};
use rl_core::{
    Collaborators, EmbeddingSpace, IncidentEvent, InvestigationRepository, InvestigationState,
    KnowledgeIngestionService, Orchestrator, RetrievalEngine,
};
use std::sync::Arc;
use tracing::{info, Instrument};
use uuid::Uuid;

/// External services used by one run.
pub struct ConnectorSet {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub logs: Arc<dyn LogQueryClient>,
    pub embedder: Arc<dyn Embedder>,
    pub tracker: Option<Arc<dyn IssueTracker>>,
}

impl ConnectorSet {
    /// Builds the HTTP connectors described by the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let reasoning = OpenAiReasoningClient::new(config.llm.to_connector())
            .context("Failed to create reasoning client")?;
        let logs = LogGatewayClient::new(config.logs.to_connector())
            .context("Failed to create log-query client")?;
        let embedder = OpenAiEmbedder::new(config.embedding.to_connector())
            .context("Failed to create embedding client")?;

        let tracker = match &config.issue_tracker {
            Some(tracker) => {
                let client = GitHubIssueTracker::new(tracker.to_connector())
                    .context("Failed to create issue tracker client")?;
                Some(Arc::new(client) as Arc<dyn IssueTracker>)
            }
            None => None,
        };

        Ok(Self {
            reasoning: Arc::new(reasoning),
            logs: Arc::new(logs),
            embedder: Arc::new(embedder),
            tracker,
        })
    }
}

/// Orchestrator plus the knowledge base it retrieves from.
pub struct InvestigationRuntime {
    pub orchestrator: Orchestrator,
    pub ingestion: KnowledgeIngestionService,
}

impl InvestigationRuntime {
    pub fn build(
        config: &AppConfig,
        connectors: ConnectorSet,
        repository: Arc<dyn InvestigationRepository>,
    ) -> Result<Self> {
        let space = EmbeddingSpace::new(
            connectors.embedder.model_id(),
            connectors.embedder.dimension(),
        );
        let store = Arc::new(InMemoryKnowledgeStore::new(space));
        let cache = Arc::new(RetrievalCache::new(&config.knowledge.cache));

        let ingestion = KnowledgeIngestionService::new(
            store.clone(),
            connectors.embedder.clone(),
            cache.clone(),
            config.knowledge.ingestion.clone(),
        )
        .context("Invalid knowledge ingestion configuration")?;
        let retriever = RetrievalEngine::new(store, connectors.embedder, cache)
            .with_config(config.knowledge.retrieval.clone());

        let orchestrator = Orchestrator::new(
            Collaborators {
                reasoning: connectors.reasoning,
                logs: connectors.logs,
                retriever: Arc::new(retriever),
                tracker: connectors.tracker,
            },
            repository,
            config.orchestrator.clone(),
        );

        Ok(Self {
            orchestrator,
            ingestion,
        })
    }

    /// Ingests the configured manifest, if any.
    pub async fn load_knowledge(&self, config: &AppConfig) -> Result<Option<IngestSummary>> {
        let Some(path) = &config.knowledge.manifest else {
            return Ok(None);
        };
        let manifest = KnowledgeManifest::load(path)?;
        let summary = manifest.ingest(&self.ingestion).await;
        info!(
            ingested = summary.ingested.len(),
            failed = summary.failed.len(),
            "Knowledge manifest loaded"
        );
        Ok(Some(summary))
    }

    pub async fn investigate(
        &self,
        incident: IncidentEvent,
        deadline: DateTime<Utc>,
    ) -> Result<InvestigationState> {
        let span = rl_observability::investigation_span!(incident.incident_id, service = %incident.service);
        let state = self
            .orchestrator
            .investigate(incident, deadline)
            .instrument(span)
            .await
            .context("Investigation could not be run")?;
        Ok(state)
    }

    pub async fn reinvestigate(
        &self,
        incident_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<InvestigationState> {
        let span = rl_observability::investigation_span!(incident_id, rerun = true);
        let state = self
            .orchestrator
            .reinvestigate(incident_id, deadline)
            .instrument(span)
            .await
            .with_context(|| format!("Re-analysis of {incident_id} failed"))?;
        Ok(state)
    }
}
