//! Document ingestion and lifecycle management.
//!
//! Mutations of a single document are serialized by a per-document async
//! lock; different documents proceed concurrently. Every mutation
//! invalidates the retrieval cache entry of the document's service.

use super::cache::RetrievalCache;
use super::chunking::{ChunkDraft, Chunker, ChunkingConfig};
use super::store::{DocumentFilter, KnowledgeStore};
use super::{
    AiContext, DocType, DocumentStatus, KnowledgeChunk, KnowledgeDocument, KnowledgeError,
    KnowledgeResult,
};
use crate::retry::{with_retry, RetryConfig};
use chrono::Utc;
use rl_connectors::Embedder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Embedding input is cut to this many characters.
    #[serde(default = "default_max_embedding_chars")]
    pub max_embedding_chars: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(skip)]
    pub retry: RetryConfig,
}

fn default_max_embedding_chars() -> usize {
    8_000
}

fn default_embed_batch_size() -> usize {
    16
}

fn default_embed_timeout_secs() -> u64 {
    15
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_embedding_chars: default_max_embedding_chars(),
            embed_batch_size: default_embed_batch_size(),
            embed_timeout_secs: default_embed_timeout_secs(),
            chunking: ChunkingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl IngestionConfig {
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// A new document as submitted by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub service: String,
    #[serde(default)]
    pub feature: Option<String>,
    pub title: String,
    pub ai_context: BTreeSet<AiContext>,
    pub doc_type: DocType,
    pub content: String,
}

impl UploadRequest {
    pub fn new(
        service: impl Into<String>,
        title: impl Into<String>,
        doc_type: DocType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            feature: None,
            title: title.into(),
            ai_context: BTreeSet::from([AiContext::Triage]),
            doc_type,
            content: content.into(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_ai_context<I: IntoIterator<Item = AiContext>>(mut self, contexts: I) -> Self {
        self.ai_context = contexts.into_iter().collect();
        self
    }

    fn validate(&self) -> KnowledgeResult<()> {
        if self.service.trim().is_empty() {
            return Err(KnowledgeError::InvalidDocument("service is required".into()));
        }
        if self.title.trim().is_empty() {
            return Err(KnowledgeError::InvalidDocument("title is required".into()));
        }
        if self.ai_context.is_empty() {
            return Err(KnowledgeError::InvalidDocument(
                "at least one ai_context tag is required".into(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(KnowledgeError::InvalidDocument("content is empty".into()));
        }
        Ok(())
    }
}

pub struct KnowledgeIngestionService {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<RetrievalCache>,
    chunker: Chunker,
    config: IngestionConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl KnowledgeIngestionService {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<RetrievalCache>,
        config: IngestionConfig,
    ) -> KnowledgeResult<Self> {
        let chunker = Chunker::new(config.chunking.clone())?;
        Ok(Self {
            store,
            embedder,
            cache,
            chunker,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn document_lock(&self, document_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn load(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        match self.store.get_document(document_id).await? {
            Some(document) => Ok(document),
            None => {
                // no lock entries for ids that do not exist
                self.locks.lock().await.remove(&document_id);
                Err(KnowledgeError::DocumentNotFound(document_id))
            }
        }
    }

    fn transition(doc: &mut KnowledgeDocument, target: DocumentStatus) -> KnowledgeResult<()> {
        if !doc.status.can_transition_to(target) {
            return Err(KnowledgeError::InvalidTransition {
                document_id: doc.document_id,
                from: doc.status,
                to: target,
            });
        }
        doc.status = target;
        doc.updated_at = Utc::now();
        Ok(())
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Registers a document in `pending` state.
    #[instrument(skip(self, request), fields(service = %request.service, title = %request.title))]
    pub async fn upload(&self, request: UploadRequest) -> KnowledgeResult<KnowledgeDocument> {
        request.validate()?;
        let now = Utc::now();
        let document = KnowledgeDocument {
            document_id: Uuid::new_v4(),
            service: request.service,
            feature: request.feature,
            title: request.title,
            ai_context: request.ai_context,
            doc_type: request.doc_type,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            version: 0,
            source_text: request.content,
            embedding_model: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&document).await?;
        info!(document_id = %document.document_id, "Document uploaded");
        Ok(document)
    }

    /// Chunks and embeds a pending or failed document, leaving it active or
    /// failed.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn process(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;
        let document = self.load(document_id).await?;
        self.process_locked(document).await
    }

    /// Upload followed by processing.
    pub async fn ingest(&self, request: UploadRequest) -> KnowledgeResult<KnowledgeDocument> {
        let document = self.upload(request).await?;
        self.process(document.document_id).await
    }

    async fn process_locked(
        &self,
        mut document: KnowledgeDocument,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let service = document.service.clone();
        Self::transition(&mut document, DocumentStatus::Processing)?;
        self.store.update_document(&document).await?;

        let result = self.finish_processing(document).await;
        self.cache.invalidate(&service).await;
        result
    }

    /// Moves a processing document to active, or to failed when chunking,
    /// embedding or the chunk swap fails.
    async fn finish_processing(
        &self,
        mut document: KnowledgeDocument,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let activated = match self.build_chunks(&document, &document.source_text).await {
            Ok(chunks) => self.activate(&document, chunks).await,
            Err(e) => Err(e),
        };

        match activated {
            Ok(active) => {
                info!(
                    chunks = active.chunk_count,
                    version = active.version,
                    "Document active"
                );
                Ok(active)
            }
            Err(e) => {
                warn!(error = %e, "Document processing failed");
                Self::transition(&mut document, DocumentStatus::Failed)?;
                document.last_error = Some(e.to_string());
                self.store.update_document(&document).await?;
                Err(e)
            }
        }
    }

    async fn activate(
        &self,
        document: &KnowledgeDocument,
        chunks: Vec<KnowledgeChunk>,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let mut active = document.clone();
        Self::transition(&mut active, DocumentStatus::Active)?;
        active.version += 1;
        active.chunk_count = chunks.len();
        active.embedding_model = Some(self.embedder.model_id().to_string());
        active.last_error = None;
        self.store.replace_chunks(&active, chunks).await?;
        Ok(active)
    }

    // ========================================================================
    // Re-embedding and updates
    // ========================================================================

    /// Rebuilds every chunk of a document. An active or disabled document
    /// keeps its old chunks until the new set is complete; on failure the old
    /// set stays in place.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn reembed(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;
        let document = self.load(document_id).await?;
        let text = document.source_text.clone();
        self.rebuild_locked(document, text).await
    }

    /// Replaces the document's text and rebuilds its chunks.
    #[instrument(skip(self, content), fields(document_id = %document_id))]
    pub async fn update_content(
        &self,
        document_id: Uuid,
        content: impl Into<String>,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(KnowledgeError::InvalidDocument("content is empty".into()));
        }
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;
        let document = self.load(document_id).await?;
        self.rebuild_locked(document, content).await
    }

    async fn rebuild_locked(
        &self,
        mut document: KnowledgeDocument,
        text: String,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let service = document.service.clone();

        if matches!(document.status, DocumentStatus::Pending | DocumentStatus::Failed) {
            document.source_text = text;
            return self.process_locked(document).await;
        }
        if document.status == DocumentStatus::Processing {
            return Err(KnowledgeError::InvalidTransition {
                document_id: document.document_id,
                from: document.status,
                to: DocumentStatus::Processing,
            });
        }

        let rebuilt = match self.build_chunks(&document, &text).await {
            Ok(chunks) => {
                let mut updated = document.clone();
                updated.source_text = text;
                updated.version += 1;
                updated.chunk_count = chunks.len();
                updated.embedding_model = Some(self.embedder.model_id().to_string());
                updated.last_error = None;
                updated.updated_at = Utc::now();
                self.store
                    .replace_chunks(&updated, chunks)
                    .await
                    .map(|()| updated)
            }
            Err(e) => Err(e),
        };

        match rebuilt {
            Ok(document) => {
                self.cache.invalidate(&service).await;
                info!(version = document.version, chunks = document.chunk_count, "Document re-embedded");
                Ok(document)
            }
            Err(e) => {
                warn!(error = %e, "Re-embedding failed, keeping previous chunks");
                document.last_error = Some(e.to_string());
                document.updated_at = Utc::now();
                self.store.update_document(&document).await?;
                self.cache.invalidate(&service).await;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Management
    // ========================================================================

    /// Excludes an active document from retrieval.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn disable(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        self.set_status(document_id, DocumentStatus::Disabled).await
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn enable(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        self.set_status(document_id, DocumentStatus::Active).await
    }

    async fn set_status(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
    ) -> KnowledgeResult<KnowledgeDocument> {
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;
        let mut document = self.load(document_id).await?;
        Self::transition(&mut document, status)?;
        self.store.update_document(&document).await?;
        self.cache.invalidate(&document.service).await;
        info!(status = %status, "Document status changed");
        Ok(document)
    }

    /// Deletes a document and all its chunks.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn delete(&self, document_id: Uuid) -> KnowledgeResult<()> {
        let lock = self.document_lock(document_id).await;
        {
            let _guard = lock.lock().await;
            let document = self.load(document_id).await?;
            if !self.store.delete_document(document_id).await? {
                return Err(KnowledgeError::DocumentNotFound(document_id));
            }
            self.cache.invalidate(&document.service).await;
            info!(service = %document.service, "Document deleted");
        }
        self.locks.lock().await.remove(&document_id);
        Ok(())
    }

    pub async fn get(&self, document_id: Uuid) -> KnowledgeResult<KnowledgeDocument> {
        self.load(document_id).await
    }

    pub async fn list(&self, filter: &DocumentFilter) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        self.store.list_documents(filter).await
    }

    // ========================================================================
    // Chunk + embed
    // ========================================================================

    async fn build_chunks(
        &self,
        document: &KnowledgeDocument,
        text: &str,
    ) -> KnowledgeResult<Vec<KnowledgeChunk>> {
        let drafts = self.chunker.chunk(text)?;
        let vectors = self.embed_drafts(&drafts).await?;

        let space = self.store.embedding_space();
        let model_id = self.embedder.model_id().to_string();
        let now = Utc::now();

        let mut chunks = Vec::with_capacity(drafts.len());
        for (draft, embedding) in drafts.into_iter().zip(vectors) {
            space.check(&model_id, embedding.len())?;
            chunks.push(KnowledgeChunk {
                chunk_id: Uuid::new_v4(),
                document_id: document.document_id,
                service: document.service.clone(),
                ai_context: document.ai_context.clone(),
                doc_type: document.doc_type,
                content: draft.content,
                embedding,
                embedding_model: model_id.clone(),
                chunk_index: draft.chunk_index,
                section_title: draft.section_title,
                token_count: draft.token_count,
                overlap_len: draft.overlap_len,
                created_at: now,
            });
        }
        Ok(chunks)
    }

    async fn embed_drafts(&self, drafts: &[ChunkDraft]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let inputs: Vec<String> = drafts
            .iter()
            .map(|d| d.content.chars().take(self.config.max_embedding_chars).collect())
            .collect();
        let timeout = Duration::from_secs(self.config.embed_timeout_secs);
        let batch_size = self.config.embed_batch_size.max(1);

        let mut vectors = Vec::with_capacity(inputs.len());
        let embedder = &self.embedder;
        for batch in inputs.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
            let texts = texts.as_slice();
            let embedded = with_retry(
                &self.config.retry,
                "embed_batch",
                |e: &KnowledgeError| e.kind().is_retryable(),
                move || async move {
                    tokio::time::timeout(timeout, embedder.embed_batch(texts))
                        .await
                        .map_err(|_| KnowledgeError::EmbeddingTimeout(timeout))?
                        .map_err(KnowledgeError::from)
                },
            )
            .await?;

            if embedded.len() != texts.len() {
                return Err(KnowledgeError::Embedding(
                    rl_connectors::ConnectorError::InvalidResponse(format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        embedded.len()
                    )),
                ));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunking::reconstruct;
    use crate::knowledge::retrieval::{KnowledgeRetriever, RetrievalEngine, RetrievalQuery};
    use crate::knowledge::store::InMemoryKnowledgeStore;
    use crate::knowledge::EmbeddingSpace;
    use rl_connectors::{ConnectorError, MockBehavior, MockEmbedder};

    const DIM: usize = 8;

    struct Harness {
        store: Arc<InMemoryKnowledgeStore>,
        embedder: Arc<MockEmbedder>,
        service: KnowledgeIngestionService,
        retriever: RetrievalEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryKnowledgeStore::new(EmbeddingSpace::new(
            "mock-embedder-v1",
            DIM,
        )));
        let embedder = Arc::new(MockEmbedder::new(DIM).with_topics(["connection pool", "disk"]));
        let cache = Arc::new(RetrievalCache::default());
        let config = IngestionConfig::default()
            .with_chunking(ChunkingConfig::new(40, 5, 4))
            .with_retry(RetryConfig::immediate(1));
        let service =
            KnowledgeIngestionService::new(store.clone(), embedder.clone(), cache.clone(), config)
                .unwrap();
        let retriever = RetrievalEngine::new(store.clone(), embedder.clone(), cache);
        Harness {
            store,
            embedder,
            service,
            retriever,
        }
    }

    fn pool_runbook() -> String {
        let mut text = String::from("# Connection pool exhausted\n\n");
        for i in 0..6 {
            text.push_str(&format!(
                "## Step group {}\n\n{}. Check the connection pool gauge and raise the limit by {} percent before paging the database team on call\n\n",
                i,
                i + 1,
                10 * (i + 1)
            ));
        }
        text
    }

    fn query() -> RetrievalQuery {
        RetrievalQuery::new("connection pool", "payments", AiContext::Triage)
    }

    #[tokio::test]
    async fn test_ingest_activates_document() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool runbook", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();

        assert_eq!(doc.status, DocumentStatus::Active);
        assert_eq!(doc.version, 1);
        assert!(doc.chunk_count > 1);
        assert_eq!(doc.embedding_model.as_deref(), Some("mock-embedder-v1"));

        let mut chunks = h.store.chunks_for_document(doc.document_id).await.unwrap();
        chunks.sort_by_key(|c| c.chunk_index);
        let drafts: Vec<ChunkDraft> = chunks
            .iter()
            .map(|c| ChunkDraft {
                content: c.content.clone(),
                chunk_index: c.chunk_index,
                section_title: c.section_title.clone(),
                token_count: c.token_count,
                overlap_len: c.overlap_len,
            })
            .collect();
        assert_eq!(reconstruct(&drafts), pool_runbook());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let h = harness();
        let err = h
            .service
            .upload(UploadRequest::new("", "t", DocType::Runbook, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidDocument(_)));

        let err = h
            .service
            .upload(UploadRequest::new("payments", "t", DocType::Runbook, "x").with_ai_context([]))
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_failed_then_recovers() {
        let h = harness();
        h.embedder
            .set_behavior(MockBehavior::AlwaysFail(ConnectorError::InvalidRequest(
                "input too large".into(),
            )))
            .await;

        let doc = h
            .service
            .upload(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        assert!(h.service.process(doc.document_id).await.is_err());

        let failed = h.service.get(doc.document_id).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert!(failed.last_error.is_some());

        h.embedder.set_behavior(MockBehavior::Normal).await;
        let recovered = h.service.process(doc.document_id).await.unwrap();
        assert_eq!(recovered.status, DocumentStatus::Active);
        assert!(recovered.last_error.is_none());
    }

    #[tokio::test]
    async fn test_transient_embedding_failure_retried() {
        let h = harness();
        h.embedder
            .set_behavior(MockBehavior::FailFirst {
                calls: 1,
                error: ConnectorError::Timeout("slow".into()),
            })
            .await;
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Active);
    }

    #[tokio::test]
    async fn test_disable_hides_document_immediately() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();

        assert!(!h.retriever.retrieve(&query()).await.unwrap().is_empty());

        h.service.disable(doc.document_id).await.unwrap();
        let results = h.retriever.retrieve(&query()).await.unwrap();
        assert!(results.iter().all(|r| r.document_id != doc.document_id));

        h.service.enable(doc.document_id).await.unwrap();
        assert!(!h.retriever.retrieve(&query()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_chunks() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        assert!(!h.retriever.retrieve(&query()).await.unwrap().is_empty());

        h.service.delete(doc.document_id).await.unwrap();
        assert!(h.retriever.retrieve(&query()).await.unwrap().is_empty());
        assert!(h.store.chunks_for_document(doc.document_id).await.unwrap().is_empty());
        assert!(matches!(
            h.service.delete(doc.document_id).await,
            Err(KnowledgeError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reembed_bumps_version_and_replaces_chunks() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        let before: BTreeSet<Uuid> = h
            .store
            .chunks_for_document(doc.document_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_id)
            .collect();

        let reembedded = h.service.reembed(doc.document_id).await.unwrap();
        assert_eq!(reembedded.version, 2);
        assert_eq!(reembedded.status, DocumentStatus::Active);

        let after: BTreeSet<Uuid> = h
            .store
            .chunks_for_document(doc.document_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chunk_id)
            .collect();
        assert!(before.is_disjoint(&after));
        assert_eq!(before.len(), after.len());
    }

    #[tokio::test]
    async fn test_failed_reembed_keeps_previous_chunks() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        let count = h.store.chunks_for_document(doc.document_id).await.unwrap().len();

        h.embedder
            .set_behavior(MockBehavior::AlwaysFail(ConnectorError::Timeout("slow".into())))
            .await;
        assert!(h.service.update_content(doc.document_id, "disk is full").await.is_err());

        let current = h.service.get(doc.document_id).await.unwrap();
        assert_eq!(current.status, DocumentStatus::Active);
        assert_eq!(current.version, 1);
        assert_eq!(current.source_text, pool_runbook());
        assert!(current.last_error.is_some());
        assert_eq!(
            h.store.chunks_for_document(doc.document_id).await.unwrap().len(),
            count
        );
    }

    #[tokio::test]
    async fn test_update_content_changes_retrieval() {
        let h = harness();
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Notes", DocType::Technical, pool_runbook()))
            .await
            .unwrap();

        h.service
            .update_content(doc.document_id, "Disk usage above ninety percent: rotate logs")
            .await
            .unwrap();

        assert!(h.retriever.retrieve(&query()).await.unwrap().is_empty());
        let disk = RetrievalQuery::new("disk", "payments", AiContext::Triage);
        assert_eq!(h.retriever.retrieve(&disk).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_status_changes() {
        let h = harness();
        let doc = h
            .service
            .upload(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        assert!(matches!(
            h.service.disable(doc.document_id).await,
            Err(KnowledgeError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.service.enable(doc.document_id).await,
            Err(KnowledgeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_operations_on_same_document() {
        let h = Arc::new(harness());
        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let h = h.clone();
            let id = doc.document_id;
            handles.push(tokio::spawn(async move { h.service.reembed(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let current = h.service.get(doc.document_id).await.unwrap();
        assert_eq!(current.version, 5);
        assert_eq!(
            h.store.chunks_for_document(doc.document_id).await.unwrap().len(),
            current.chunk_count
        );
    }

    #[tokio::test]
    async fn test_list_by_service() {
        let h = harness();
        h.service
            .ingest(UploadRequest::new("payments", "A", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        h.service
            .upload(UploadRequest::new("search", "B", DocType::Runbook, "disk"))
            .await
            .unwrap();

        let payments = h
            .service
            .list(&DocumentFilter::for_service("payments"))
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        let pending = h
            .service
            .list(&DocumentFilter::default().with_status(DocumentStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    /// Delegates to an in-memory store; chunk swaps fail while `broken` is set.
    struct SwapFailingStore {
        inner: InMemoryKnowledgeStore,
        broken: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl KnowledgeStore for SwapFailingStore {
        fn embedding_space(&self) -> &EmbeddingSpace {
            self.inner.embedding_space()
        }

        async fn insert_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()> {
            self.inner.insert_document(document).await
        }

        async fn get_document(&self, document_id: Uuid) -> KnowledgeResult<Option<KnowledgeDocument>> {
            self.inner.get_document(document_id).await
        }

        async fn update_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()> {
            self.inner.update_document(document).await
        }

        async fn list_documents(
            &self,
            filter: &DocumentFilter,
        ) -> KnowledgeResult<Vec<KnowledgeDocument>> {
            self.inner.list_documents(filter).await
        }

        async fn replace_chunks(
            &self,
            document: &KnowledgeDocument,
            chunks: Vec<KnowledgeChunk>,
        ) -> KnowledgeResult<()> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(KnowledgeError::Store("chunk table unavailable".into()));
            }
            self.inner.replace_chunks(document, chunks).await
        }

        async fn chunks_for_document(&self, document_id: Uuid) -> KnowledgeResult<Vec<KnowledgeChunk>> {
            self.inner.chunks_for_document(document_id).await
        }

        async fn delete_document(&self, document_id: Uuid) -> KnowledgeResult<bool> {
            self.inner.delete_document(document_id).await
        }

        async fn candidate_chunks(&self, service: &str) -> KnowledgeResult<crate::knowledge::store::CandidateSet> {
            self.inner.candidate_chunks(service).await
        }

        async fn service_revision(&self, service: &str) -> KnowledgeResult<u64> {
            self.inner.service_revision(service).await
        }

        async fn stats(&self) -> KnowledgeResult<crate::knowledge::store::StoreStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_chunk_swap_failure_marks_failed() {
        let store = Arc::new(SwapFailingStore {
            inner: InMemoryKnowledgeStore::new(EmbeddingSpace::new("mock-embedder-v1", DIM)),
            broken: std::sync::atomic::AtomicBool::new(true),
        });
        let embedder = Arc::new(MockEmbedder::new(DIM));
        let cache = Arc::new(RetrievalCache::default());
        let config = IngestionConfig::default()
            .with_chunking(ChunkingConfig::new(40, 5, 4))
            .with_retry(RetryConfig::immediate(1));
        let service =
            KnowledgeIngestionService::new(store.clone(), embedder, cache, config).unwrap();

        let doc = service
            .upload(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        let err = service.process(doc.document_id).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Store(_)));

        let failed = service.get(doc.document_id).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(failed.chunk_count, 0);
        assert!(failed.last_error.as_deref().unwrap().contains("chunk table unavailable"));

        store.broken.store(false, std::sync::atomic::Ordering::SeqCst);
        let active = service.process(doc.document_id).await.unwrap();
        assert_eq!(active.status, DocumentStatus::Active);
        assert_eq!(active.version, 1);

        store.broken.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(service.reembed(doc.document_id).await.is_err());
        let kept = service.get(doc.document_id).await.unwrap();
        assert_eq!(kept.status, DocumentStatus::Active);
        assert_eq!(kept.version, 1);
        assert_eq!(
            store.chunks_for_document(doc.document_id).await.unwrap().len(),
            kept.chunk_count
        );
    }

    #[tokio::test]
    async fn test_unknown_ids_leave_no_locks() {
        let h = harness();
        let unknown = Uuid::new_v4();

        assert!(matches!(
            h.service.process(unknown).await,
            Err(KnowledgeError::DocumentNotFound(_))
        ));
        assert!(h.service.disable(unknown).await.is_err());
        assert!(h.service.reembed(unknown).await.is_err());
        assert!(h.service.delete(unknown).await.is_err());
        assert_eq!(h.service.tracked_locks().await, 0);

        let doc = h
            .service
            .ingest(UploadRequest::new("payments", "Pool", DocType::Runbook, pool_runbook()))
            .await
            .unwrap();
        assert_eq!(h.service.tracked_locks().await, 1);
        h.service.delete(doc.document_id).await.unwrap();
        assert_eq!(h.service.tracked_locks().await, 0);
    }
}
