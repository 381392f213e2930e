//! Similarity retrieval over the knowledge store.
//!
//! Candidates are the active chunks of one service, narrowed by AI context
//! and document type, then scored by cosine similarity in a linear scan.

use super::cache::RetrievalCache;
use super::store::{CandidateSet, KnowledgeStore};
use super::{AiContext, DocType, KnowledgeError, KnowledgeResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rl_connectors::Embedder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Parameters of one retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub query_text: String,
    pub service: String,
    pub ai_context: AiContext,
    pub doc_types: Vec<DocType>,
    pub top_k: usize,
    pub threshold: f32,
}

impl RetrievalQuery {
    pub fn new(
        query_text: impl Into<String>,
        service: impl Into<String>,
        ai_context: AiContext,
    ) -> Self {
        Self {
            query_text: query_text.into(),
            service: service.into(),
            ai_context,
            doc_types: vec![DocType::Runbook, DocType::Technical, DocType::PreviousIncident],
            top_k: 3,
            threshold: 0.7,
        }
    }

    pub fn with_doc_types(mut self, doc_types: Vec<DocType>) -> Self {
        self.doc_types = doc_types;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    fn validate(&self) -> KnowledgeResult<()> {
        if self.query_text.trim().is_empty() {
            return Err(KnowledgeError::InvalidQuery("query text is empty".into()));
        }
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(KnowledgeError::InvalidQuery(format!(
                "threshold {} is outside [-1, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub section_title: Option<String>,
    pub similarity: f32,
    pub doc_type: DocType,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
}

/// Anything that can answer a [`RetrievalQuery`].
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> KnowledgeResult<Vec<RetrievedChunk>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

fn default_embed_timeout_secs() -> u64 {
    15
}

fn default_max_query_chars() -> usize {
    8_000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embed_timeout_secs: default_embed_timeout_secs(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Highest similarity first, then the newest chunk.
fn rank(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

pub struct RetrievalEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<RetrievalCache>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<RetrievalCache>,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    async fn embed_query(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let input: String = text.chars().take(self.config.max_query_chars).collect();
        let timeout = Duration::from_secs(self.config.embed_timeout_secs);

        let vector = tokio::time::timeout(timeout, self.embedder.embed(&input))
            .await
            .map_err(|_| KnowledgeError::EmbeddingTimeout(timeout))??;

        self.store
            .embedding_space()
            .check(self.embedder.model_id(), vector.len())?;
        Ok(vector)
    }

    async fn candidates(&self, service: &str) -> KnowledgeResult<Arc<CandidateSet>> {
        let revision = self.store.service_revision(service).await?;
        if let Some(set) = self.cache.get(service, revision).await {
            return Ok(set);
        }
        let set = Arc::new(self.store.candidate_chunks(service).await?);
        self.cache.insert(set.clone()).await;
        Ok(set)
    }
}

#[async_trait]
impl KnowledgeRetriever for RetrievalEngine {
    #[instrument(skip(self, query), fields(service = %query.service, top_k = query.top_k))]
    async fn retrieve(&self, query: &RetrievalQuery) -> KnowledgeResult<Vec<RetrievedChunk>> {
        query.validate()?;
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query(&query.query_text).await?;
        let candidates = self.candidates(&query.service).await?;

        let mut results: Vec<RetrievedChunk> = candidates
            .chunks
            .iter()
            .filter(|c| c.ai_context.contains(&query.ai_context))
            .filter(|c| query.doc_types.contains(&c.doc_type))
            .filter_map(|c| {
                let similarity = cosine_similarity(&query_vector, &c.embedding);
                (similarity >= query.threshold).then(|| RetrievedChunk {
                    chunk_id: c.chunk_id,
                    document_id: c.document_id,
                    content: c.content.clone(),
                    section_title: c.section_title.clone(),
                    similarity,
                    doc_type: c.doc_type,
                    chunk_index: c.chunk_index,
                    created_at: c.created_at,
                })
            })
            .collect();

        results.sort_by(rank);
        results.truncate(query.top_k);

        debug!(
            candidates = candidates.chunks.len(),
            returned = results.len(),
            "Retrieval complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::InMemoryKnowledgeStore;
    use crate::knowledge::{DocumentStatus, EmbeddingSpace, KnowledgeChunk, KnowledgeDocument};
    use chrono::Duration as ChronoDuration;
    use rl_connectors::{ConnectorError, MockBehavior, MockEmbedder};
    use std::collections::BTreeSet;

    const DIM: usize = 8;

    fn embedder() -> Arc<MockEmbedder> {
        Arc::new(MockEmbedder::new(DIM).with_topics(["connection pool", "disk", "deploy"]))
    }

    fn store() -> Arc<InMemoryKnowledgeStore> {
        Arc::new(InMemoryKnowledgeStore::new(EmbeddingSpace::new(
            "mock-embedder-v1",
            DIM,
        )))
    }

    async fn add_document(
        store: &InMemoryKnowledgeStore,
        embedder: &MockEmbedder,
        doc_type: DocType,
        contents: &[&str],
        age_minutes: i64,
    ) -> KnowledgeDocument {
        let created = Utc::now() - ChronoDuration::minutes(age_minutes);
        let doc = KnowledgeDocument {
            document_id: Uuid::new_v4(),
            service: "payments".to_string(),
            feature: None,
            title: "doc".to_string(),
            ai_context: BTreeSet::from([AiContext::Triage]),
            doc_type,
            status: DocumentStatus::Active,
            chunk_count: 0,
            version: 1,
            source_text: contents.concat(),
            embedding_model: Some("mock-embedder-v1".to_string()),
            last_error: None,
            created_at: created,
            updated_at: created,
        };
        store.insert_document(&doc).await.unwrap();

        let mut chunks = Vec::new();
        for (i, content) in contents.iter().enumerate() {
            chunks.push(KnowledgeChunk {
                chunk_id: Uuid::new_v4(),
                document_id: doc.document_id,
                service: doc.service.clone(),
                ai_context: doc.ai_context.clone(),
                doc_type,
                content: content.to_string(),
                embedding: embedder.embed(content).await.unwrap(),
                embedding_model: "mock-embedder-v1".to_string(),
                chunk_index: i,
                section_title: Some(format!("Section {}", i)),
                token_count: content.split_whitespace().count(),
                overlap_len: 0,
                created_at: created,
            });
        }
        store.replace_chunks(&doc, chunks).await.unwrap();
        doc
    }

    fn engine(store: Arc<InMemoryKnowledgeStore>, embedder: Arc<MockEmbedder>) -> RetrievalEngine {
        RetrievalEngine::new(store, embedder, Arc::new(RetrievalCache::default()))
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_threshold_and_ranking() {
        let store = store();
        let embedder = embedder();
        add_document(
            &store,
            &embedder,
            DocType::Runbook,
            &["Connection pool exhausted: raise max connections", "Disk cleanup"],
            10,
        )
        .await;

        let engine = engine(store, embedder);
        let query = RetrievalQuery::new("errors: connection pool exhausted", "payments", AiContext::Triage);
        let results = engine.retrieve(&query).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].content.starts_with("Connection pool"));
        assert!(results[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_ties_prefer_newest_chunk() {
        let store = store();
        let embedder = embedder();
        let old = add_document(&store, &embedder, DocType::Runbook, &["disk runbook"], 60).await;
        let new = add_document(&store, &embedder, DocType::Technical, &["disk notes"], 1).await;

        let engine = engine(store, embedder);
        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        let results = engine.retrieve(&query).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, new.document_id);
        assert_eq!(results[1].document_id, old.document_id);
    }

    #[tokio::test]
    async fn test_filters_doc_type_and_context() {
        let store = store();
        let embedder = embedder();
        add_document(&store, &embedder, DocType::Guideline, &["disk guideline"], 5).await;

        let engine = engine(store, embedder);
        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        assert!(engine.retrieve(&query).await.unwrap().is_empty());

        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage)
            .with_doc_types(vec![DocType::Guideline]);
        assert_eq!(engine.retrieve(&query).await.unwrap().len(), 1);

        let query = RetrievalQuery::new("disk", "payments", AiContext::Remediation)
            .with_doc_types(vec![DocType::Guideline]);
        assert!(engine.retrieve(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_and_determinism() {
        let store = store();
        let embedder = embedder();
        for age in 0..5 {
            add_document(&store, &embedder, DocType::Runbook, &["deploy rollback steps"], age).await;
        }

        let engine = engine(store, embedder);
        let query = RetrievalQuery::new("deploy", "payments", AiContext::Triage).with_top_k(3);
        let first = engine.retrieve(&query).await.unwrap();
        let second = engine.retrieve(&query).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disabled_document_not_served_from_cache() {
        let store = store();
        let embedder = embedder();
        let doc = add_document(&store, &embedder, DocType::Runbook, &["disk full"], 5).await;

        let engine = engine(store.clone(), embedder);
        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        assert_eq!(engine.retrieve(&query).await.unwrap().len(), 1);

        // write through the store only; the revision check alone must catch it
        let mut disabled = doc.clone();
        disabled.status = DocumentStatus::Disabled;
        store.update_document(&disabled).await.unwrap();

        assert!(engine.retrieve(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_model_mismatch() {
        let store = store();
        let other = Arc::new(MockEmbedder::new(DIM).with_model_id("other-model"));
        let engine = engine(store, other);
        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        assert!(matches!(
            engine.retrieve(&query).await,
            Err(KnowledgeError::EmbeddingMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_embedder_failure_propagates() {
        let store = store();
        let embedder = embedder();
        embedder
            .set_behavior(MockBehavior::AlwaysFail(ConnectorError::Timeout("slow".into())))
            .await;
        let engine = engine(store, embedder);
        let query = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        let err = engine.retrieve(&query).await.unwrap_err();
        assert_eq!(err.kind(), rl_connectors::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_invalid_query() {
        let engine = engine(store(), embedder());
        let query = RetrievalQuery::new("  ", "payments", AiContext::Triage);
        assert!(matches!(
            engine.retrieve(&query).await,
            Err(KnowledgeError::InvalidQuery(_))
        ));
    }
}
