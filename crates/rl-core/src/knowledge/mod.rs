//! Knowledge base for retrieval-augmented diagnosis.
//!
//! Documents (runbooks, technical notes, guidelines, previous incidents) are
//! chunked, embedded and stored per service. Retrieval is a metadata
//! pre-filter followed by a brute-force cosine scan over the surviving chunks.
//!
//! ```text
//! upload ─► pending ─► processing ─► chunk ─► embed ─► active
//!                                        │
//!                                        └──────────► failed
//! active ◄─► disabled        delete: document and chunks together
//! ```

pub mod cache;
pub mod chunking;
pub mod ingestion;
pub mod retrieval;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

pub use cache::{CacheConfig, RetrievalCache};
pub use chunking::{ChunkDraft, Chunker, ChunkingConfig, ChunkingError};
pub use ingestion::{IngestionConfig, KnowledgeIngestionService, UploadRequest};
pub use retrieval::{
    cosine_similarity, KnowledgeRetriever, RetrievalConfig, RetrievalEngine, RetrievalQuery,
    RetrievedChunk,
};
pub use store::{CandidateSet, DocumentFilter, InMemoryKnowledgeStore, KnowledgeStore, StoreStats};

/// Errors from the knowledge subsystem.
#[derive(Error, Debug, Clone)]
pub enum KnowledgeError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Invalid status transition for {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Embedding mismatch: expected {expected}, got {actual}")]
    EmbeddingMismatch { expected: String, actual: String },

    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] rl_connectors::ConnectorError),

    #[error("Embedding timed out after {0:?}")]
    EmbeddingTimeout(std::time::Duration),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid retrieval query: {0}")]
    InvalidQuery(String),

    #[error("Knowledge store error: {0}")]
    Store(String),
}

impl KnowledgeError {
    /// Kind under the shared failure taxonomy.
    pub fn kind(&self) -> rl_connectors::ErrorKind {
        use rl_connectors::ErrorKind;
        match self {
            KnowledgeError::DocumentNotFound(_) => ErrorKind::NotFound,
            KnowledgeError::Embedding(e) => e.kind(),
            KnowledgeError::EmbeddingTimeout(_) => ErrorKind::Timeout,
            KnowledgeError::Store(_) => ErrorKind::Tool,
            KnowledgeError::EmbeddingMismatch { .. }
            | KnowledgeError::InvalidTransition { .. }
            | KnowledgeError::InvalidDocument(_)
            | KnowledgeError::InvalidQuery(_)
            | KnowledgeError::Chunking(_) => ErrorKind::Validation,
        }
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Which pipeline stage a document is meant to inform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AiContext {
    Triage,
    Analysis,
    Remediation,
}

impl AiContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiContext::Triage => "triage",
            AiContext::Analysis => "analysis",
            AiContext::Remediation => "remediation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "triage" => Some(AiContext::Triage),
            "analysis" => Some(AiContext::Analysis),
            "remediation" => Some(AiContext::Remediation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Runbook,
    Technical,
    Guideline,
    PreviousIncident,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Runbook => "runbook",
            DocType::Technical => "technical",
            DocType::Guideline => "guideline",
            DocType::PreviousIncident => "previous_incident",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "runbook" => Some(DocType::Runbook),
            "technical" => Some(DocType::Technical),
            "guideline" => Some(DocType::Guideline),
            "previous_incident" => Some(DocType::PreviousIncident),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Active,
    Disabled,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Active => "active",
            DocumentStatus::Disabled => "disabled",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Lifecycle edges. Re-embedding an active document swaps its chunks
    /// without leaving `Active`, so there is no `Active -> Processing` edge.
    pub fn can_transition_to(&self, target: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Active)
                | (Processing, Failed)
                | (Failed, Processing)
                | (Active, Disabled)
                | (Disabled, Active)
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model id and vector size every chunk in a store must share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub model_id: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
        }
    }

    /// Rejects vectors produced by another model or of another size.
    pub fn check(&self, model_id: &str, dimension: usize) -> KnowledgeResult<()> {
        if model_id != self.model_id || dimension != self.dimension {
            return Err(KnowledgeError::EmbeddingMismatch {
                expected: self.to_string(),
                actual: format!("{}/{}", model_id, dimension),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model_id, self.dimension)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub document_id: Uuid,
    pub service: String,
    #[serde(default)]
    pub feature: Option<String>,
    pub title: String,
    pub ai_context: BTreeSet<AiContext>,
    pub doc_type: DocType,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// Incremented whenever the chunk set is replaced.
    pub version: u32,
    pub source_text: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    /// Whether the document's chunks may be retrieved.
    pub fn is_retrievable(&self) -> bool {
        self.status == DocumentStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub service: String,
    pub ai_context: BTreeSet<AiContext>,
    pub doc_type: DocType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub chunk_index: usize,
    pub section_title: Option<String>,
    pub token_count: usize,
    /// Bytes at the start of `content` repeated from the previous chunk.
    pub overlap_len: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lifecycle() {
        use DocumentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Active));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
        assert!(Active.can_transition_to(Disabled));
        assert!(Disabled.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Active));
        assert!(!Disabled.can_transition_to(Processing));
        assert!(!Active.can_transition_to(Pending));
    }

    #[test]
    fn test_embedding_space_check() {
        let space = EmbeddingSpace::new("text-embedding-3-small", 1536);
        assert!(space.check("text-embedding-3-small", 1536).is_ok());
        assert!(matches!(
            space.check("text-embedding-3-small", 768),
            Err(KnowledgeError::EmbeddingMismatch { .. })
        ));
        assert!(space.check("text-embedding-ada-002", 1536).is_err());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(DocType::parse("Previous_Incident"), Some(DocType::PreviousIncident));
        assert_eq!(AiContext::parse("TRIAGE"), Some(AiContext::Triage));
        assert_eq!(AiContext::parse("billing"), None);
    }

    #[test]
    fn test_error_kinds() {
        use rl_connectors::ErrorKind;
        assert_eq!(
            KnowledgeError::DocumentNotFound(Uuid::new_v4()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            KnowledgeError::Embedding(rl_connectors::ConnectorError::Timeout("t".into())).kind(),
            ErrorKind::Timeout
        );
    }
}
