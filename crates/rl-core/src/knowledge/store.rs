//! Knowledge store: documents and their chunks.
//!
//! All writes that touch a service bump that service's revision. The
//! retrieval cache compares revisions to decide whether a cached candidate
//! set is still current.

use super::{
    AiContext, DocType, DocumentStatus, EmbeddingSpace, KnowledgeChunk, KnowledgeDocument,
    KnowledgeError, KnowledgeResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Chunks of every active document of one service, as of `revision`.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub service: String,
    pub revision: u64,
    pub chunks: Arc<Vec<KnowledgeChunk>>,
}

/// Filter for document listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub service: Option<String>,
    pub status: Option<DocumentStatus>,
    pub ai_context: Option<AiContext>,
    pub doc_type: Option<DocType>,
}

impl DocumentFilter {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_ai_context(mut self, context: AiContext) -> Self {
        self.ai_context = Some(context);
        self
    }

    pub fn with_doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    pub fn matches(&self, doc: &KnowledgeDocument) -> bool {
        self.service.as_deref().map_or(true, |s| doc.service == s)
            && self.status.map_or(true, |s| doc.status == s)
            && self.ai_context.map_or(true, |c| doc.ai_context.contains(&c))
            && self.doc_type.map_or(true, |t| doc.doc_type == t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub documents_by_status: BTreeMap<String, usize>,
}

/// Persistence for knowledge documents and chunks.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Model and dimension every stored chunk must share.
    fn embedding_space(&self) -> &EmbeddingSpace;

    async fn insert_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()>;

    async fn get_document(&self, document_id: Uuid) -> KnowledgeResult<Option<KnowledgeDocument>>;

    /// Overwrites document metadata. Chunks are untouched.
    async fn update_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()>;

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> KnowledgeResult<Vec<KnowledgeDocument>>;

    /// Writes `document` and swaps its whole chunk set in one step.
    async fn replace_chunks(
        &self,
        document: &KnowledgeDocument,
        chunks: Vec<KnowledgeChunk>,
    ) -> KnowledgeResult<()>;

    async fn chunks_for_document(&self, document_id: Uuid) -> KnowledgeResult<Vec<KnowledgeChunk>>;

    /// Removes a document together with all of its chunks.
    /// Returns false when the document did not exist.
    async fn delete_document(&self, document_id: Uuid) -> KnowledgeResult<bool>;

    /// Retrieval candidates: chunks of active documents for `service`.
    async fn candidate_chunks(&self, service: &str) -> KnowledgeResult<CandidateSet>;

    async fn service_revision(&self, service: &str) -> KnowledgeResult<u64>;

    async fn stats(&self) -> KnowledgeResult<StoreStats>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Default)]
struct StoreInner {
    documents: HashMap<Uuid, KnowledgeDocument>,
    chunks: HashMap<Uuid, Vec<KnowledgeChunk>>,
    revisions: HashMap<String, u64>,
    next_revision: u64,
}

impl StoreInner {
    fn bump(&mut self, service: &str) {
        self.next_revision += 1;
        self.revisions
            .insert(service.to_string(), self.next_revision);
    }
}

/// Store held behind a single lock, so every write is atomic for readers.
pub struct InMemoryKnowledgeStore {
    space: EmbeddingSpace,
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryKnowledgeStore {
    pub fn new(space: EmbeddingSpace) -> Self {
        Self {
            space,
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    fn check_chunks(
        &self,
        document: &KnowledgeDocument,
        chunks: &[KnowledgeChunk],
    ) -> KnowledgeResult<()> {
        for chunk in chunks {
            if chunk.document_id != document.document_id {
                return Err(KnowledgeError::InvalidDocument(format!(
                    "chunk {} belongs to {}, not {}",
                    chunk.chunk_id, chunk.document_id, document.document_id
                )));
            }
            self.space
                .check(&chunk.embedding_model, chunk.embedding.len())?;
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    fn embedding_space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn insert_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()> {
        let mut inner = self.inner.write().await;
        if inner.documents.contains_key(&document.document_id) {
            return Err(KnowledgeError::InvalidDocument(format!(
                "document {} already exists",
                document.document_id
            )));
        }
        inner
            .documents
            .insert(document.document_id, document.clone());
        inner.bump(&document.service);
        Ok(())
    }

    async fn get_document(&self, document_id: Uuid) -> KnowledgeResult<Option<KnowledgeDocument>> {
        Ok(self.inner.read().await.documents.get(&document_id).cloned())
    }

    async fn update_document(&self, document: &KnowledgeDocument) -> KnowledgeResult<()> {
        let mut inner = self.inner.write().await;
        let previous_service = inner
            .documents
            .get(&document.document_id)
            .map(|d| d.service.clone())
            .ok_or(KnowledgeError::DocumentNotFound(document.document_id))?;

        inner
            .documents
            .insert(document.document_id, document.clone());
        if previous_service != document.service {
            inner.bump(&previous_service);
        }
        inner.bump(&document.service);
        Ok(())
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<KnowledgeDocument> = inner
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(docs)
    }

    async fn replace_chunks(
        &self,
        document: &KnowledgeDocument,
        mut chunks: Vec<KnowledgeChunk>,
    ) -> KnowledgeResult<()> {
        self.check_chunks(document, &chunks)?;
        chunks.sort_by_key(|c| c.chunk_index);

        let mut inner = self.inner.write().await;
        if !inner.documents.contains_key(&document.document_id) {
            return Err(KnowledgeError::DocumentNotFound(document.document_id));
        }

        debug!(
            document_id = %document.document_id,
            service = %document.service,
            chunks = chunks.len(),
            "Replacing chunk set"
        );

        let mut document = document.clone();
        document.chunk_count = chunks.len();
        inner.documents.insert(document.document_id, document.clone());
        inner.chunks.insert(document.document_id, chunks);
        inner.bump(&document.service);
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> KnowledgeResult<Vec<KnowledgeChunk>> {
        Ok(self
            .inner
            .read()
            .await
            .chunks
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_document(&self, document_id: Uuid) -> KnowledgeResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(document) = inner.documents.remove(&document_id) else {
            return Ok(false);
        };
        inner.chunks.remove(&document_id);
        inner.bump(&document.service);
        Ok(true)
    }

    async fn candidate_chunks(&self, service: &str) -> KnowledgeResult<CandidateSet> {
        let inner = self.inner.read().await;
        let chunks: Vec<KnowledgeChunk> = inner
            .documents
            .values()
            .filter(|d| d.service == service && d.is_retrievable())
            .filter_map(|d| inner.chunks.get(&d.document_id))
            .flatten()
            .cloned()
            .collect();

        Ok(CandidateSet {
            service: service.to_string(),
            revision: inner.revisions.get(service).copied().unwrap_or(0),
            chunks: Arc::new(chunks),
        })
    }

    async fn service_revision(&self, service: &str) -> KnowledgeResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .revisions
            .get(service)
            .copied()
            .unwrap_or(0))
    }

    async fn stats(&self) -> KnowledgeResult<StoreStats> {
        let inner = self.inner.read().await;
        let mut documents_by_status = BTreeMap::new();
        for doc in inner.documents.values() {
            *documents_by_status
                .entry(doc.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(StoreStats {
            documents: inner.documents.len(),
            chunks: inner.chunks.values().map(Vec::len).sum(),
            documents_by_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn space() -> EmbeddingSpace {
        EmbeddingSpace::new("test-model", 3)
    }

    fn document(service: &str, status: DocumentStatus) -> KnowledgeDocument {
        KnowledgeDocument {
            document_id: Uuid::new_v4(),
            service: service.to_string(),
            feature: None,
            title: "Runbook".to_string(),
            ai_context: BTreeSet::from([AiContext::Triage]),
            doc_type: DocType::Runbook,
            status,
            chunk_count: 0,
            version: 0,
            source_text: "text".to_string(),
            embedding_model: Some("test-model".to_string()),
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn chunk(doc: &KnowledgeDocument, index: usize, model: &str, dim: usize) -> KnowledgeChunk {
        KnowledgeChunk {
            chunk_id: Uuid::new_v4(),
            document_id: doc.document_id,
            service: doc.service.clone(),
            ai_context: doc.ai_context.clone(),
            doc_type: doc.doc_type,
            content: format!("chunk {}", index),
            embedding: vec![1.0; dim],
            embedding_model: model.to_string(),
            chunk_index: index,
            section_title: None,
            token_count: 2,
            overlap_len: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_candidates_only_from_active_documents() {
        let store = InMemoryKnowledgeStore::new(space());
        let active = document("payments", DocumentStatus::Active);
        let disabled = document("payments", DocumentStatus::Disabled);
        let other = document("search", DocumentStatus::Active);

        for doc in [&active, &disabled, &other] {
            store.insert_document(doc).await.unwrap();
            let chunks = vec![chunk(doc, 0, "test-model", 3), chunk(doc, 1, "test-model", 3)];
            store.replace_chunks(doc, chunks).await.unwrap();
        }

        let set = store.candidate_chunks("payments").await.unwrap();
        assert_eq!(set.chunks.len(), 2);
        assert!(set.chunks.iter().all(|c| c.document_id == active.document_id));
    }

    #[tokio::test]
    async fn test_replace_chunks_rejects_other_embedding_space() {
        let store = InMemoryKnowledgeStore::new(space());
        let doc = document("payments", DocumentStatus::Active);
        store.insert_document(&doc).await.unwrap();

        let err = store
            .replace_chunks(&doc, vec![chunk(&doc, 0, "test-model", 4)])
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingMismatch { .. }));

        let err = store
            .replace_chunks(&doc, vec![chunk(&doc, 0, "other-model", 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingMismatch { .. }));
        assert!(store.chunks_for_document(doc.document_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_chunks_swaps_whole_set() {
        let store = InMemoryKnowledgeStore::new(space());
        let doc = document("payments", DocumentStatus::Active);
        store.insert_document(&doc).await.unwrap();

        let first: Vec<_> = (0..3).map(|i| chunk(&doc, i, "test-model", 3)).collect();
        store.replace_chunks(&doc, first).await.unwrap();
        let second: Vec<_> = (0..2).map(|i| chunk(&doc, i, "test-model", 3)).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.chunk_id).collect();
        store.replace_chunks(&doc, second).await.unwrap();

        let stored = store.chunks_for_document(doc.document_id).await.unwrap();
        assert_eq!(stored.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), second_ids);
        let stored_doc = store.get_document(doc.document_id).await.unwrap().unwrap();
        assert_eq!(stored_doc.chunk_count, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let store = InMemoryKnowledgeStore::new(space());
        let doc = document("payments", DocumentStatus::Active);
        store.insert_document(&doc).await.unwrap();
        store
            .replace_chunks(&doc, vec![chunk(&doc, 0, "test-model", 3)])
            .await
            .unwrap();

        assert!(store.delete_document(doc.document_id).await.unwrap());
        assert!(!store.delete_document(doc.document_id).await.unwrap());
        assert!(store.get_document(doc.document_id).await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().chunks, 0);
    }

    #[tokio::test]
    async fn test_revision_moves_on_every_write() {
        let store = InMemoryKnowledgeStore::new(space());
        assert_eq!(store.service_revision("payments").await.unwrap(), 0);

        let mut doc = document("payments", DocumentStatus::Active);
        store.insert_document(&doc).await.unwrap();
        let r1 = store.service_revision("payments").await.unwrap();

        doc.status = DocumentStatus::Disabled;
        store.update_document(&doc).await.unwrap();
        let r2 = store.service_revision("payments").await.unwrap();
        assert!(r2 > r1);

        store.delete_document(doc.document_id).await.unwrap();
        assert!(store.service_revision("payments").await.unwrap() > r2);
        assert_eq!(store.service_revision("search").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_document() {
        let store = InMemoryKnowledgeStore::new(space());
        let doc = document("payments", DocumentStatus::Active);
        assert!(matches!(
            store.update_document(&doc).await,
            Err(KnowledgeError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_with_filter_and_stats() {
        let store = InMemoryKnowledgeStore::new(space());
        store
            .insert_document(&document("payments", DocumentStatus::Active))
            .await
            .unwrap();
        store
            .insert_document(&document("payments", DocumentStatus::Failed))
            .await
            .unwrap();
        store
            .insert_document(&document("search", DocumentStatus::Active))
            .await
            .unwrap();

        let filter = DocumentFilter::for_service("payments").with_status(DocumentStatus::Active);
        assert_eq!(store.list_documents(&filter).await.unwrap().len(), 1);
        let all = store.list_documents(&DocumentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.documents_by_status.get("active"), Some(&2));
        assert_eq!(stats.documents_by_status.get("failed"), Some(&1));
    }
}
