//! Knowledge manifest loading.
//!
//! A manifest lists the documents to ingest before an investigation runs:
//!
//! ```yaml
//! documents:
//!   - service: payment-service
//!     title: Payment DB runbook
//!     doc_type: runbook
//!     ai_context: [triage, remediation]
//!     path: runbooks/payment-db.md
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use anyhow::{Context, Result};
use rl_core::knowledge::UploadRequest;
use rl_core::{AiContext, DocType, KnowledgeDocument, KnowledgeIngestionService};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeManifest {
    #[serde(default)]
    pub documents: Vec<ManifestEntry>,

    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub service: String,
    pub title: String,
    pub doc_type: DocType,
    #[serde(default = "default_ai_context")]
    pub ai_context: Vec<AiContext>,
    #[serde(default)]
    pub feature: Option<String>,
    pub path: PathBuf,
}

fn default_ai_context() -> Vec<AiContext> {
    vec![AiContext::Triage]
}

/// Outcome of ingesting a manifest.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub ingested: Vec<KnowledgeDocument>,
    /// Title and error of every document that could not be ingested.
    pub failed: Vec<(String, String)>,
}

impl KnowledgeManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge manifest: {}", path.display()))?;

        let mut manifest: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse knowledge manifest: {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(manifest)
    }

    pub fn resolve(&self, entry: &ManifestEntry) -> PathBuf {
        if entry.path.is_absolute() {
            entry.path.clone()
        } else {
            self.base_dir.join(&entry.path)
        }
    }

    /// Reads one entry's file into an upload request.
    pub fn upload_request(&self, entry: &ManifestEntry) -> Result<UploadRequest> {
        let path = self.resolve(entry);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read document '{}': {}", entry.title, path.display()))?;

        let mut request = UploadRequest::new(&entry.service, &entry.title, entry.doc_type, content)
            .with_ai_context(entry.ai_context.iter().copied());
        if let Some(feature) = &entry.feature {
            request = request.with_feature(feature);
        }
        Ok(request)
    }

    /// Ingests every document, continuing past individual failures.
    pub async fn ingest(&self, ingestion: &KnowledgeIngestionService) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for entry in &self.documents {
            let result = match self.upload_request(entry) {
                Ok(request) => ingestion.ingest(request).await.map_err(anyhow::Error::from),
                Err(e) => Err(e),
            };

            match result {
                Ok(document) => {
                    info!(
                        document_id = %document.document_id,
                        service = %document.service,
                        chunks = document.chunk_count,
                        "Ingested knowledge document"
                    );
                    summary.ingested.push(document);
                }
                Err(e) => {
                    warn!(title = %entry.title, error = %e, "Knowledge document not ingested");
                    summary.failed.push((entry.title.clone(), format!("{e:#}")));
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_connectors::MockEmbedder;
    use rl_core::knowledge::{CacheConfig, InMemoryKnowledgeStore, IngestionConfig, RetrievalCache};
    use rl_core::{DocumentStatus, EmbeddingSpace};
    use std::sync::Arc;

    fn write_manifest(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("manifest.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    fn ingestion() -> KnowledgeIngestionService {
        let store = Arc::new(InMemoryKnowledgeStore::new(EmbeddingSpace::new(
            "mock-embedder-v1",
            8,
        )));
        KnowledgeIngestionService::new(
            store,
            Arc::new(MockEmbedder::new(8)),
            Arc::new(RetrievalCache::new(&CacheConfig::default())),
            IngestionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
documents:
  - service: payment-service
    title: Payment DB runbook
    doc_type: runbook
    path: runbooks/db.md
  - service: payment-service
    title: Past outage
    doc_type: previous_incident
    ai_context: [triage, remediation]
    path: /srv/knowledge/outage.md
"#,
        );

        let manifest = KnowledgeManifest::load(&path).unwrap();
        assert_eq!(manifest.documents.len(), 2);
        assert_eq!(manifest.documents[0].ai_context, vec![AiContext::Triage]);
        assert_eq!(
            manifest.resolve(&manifest.documents[0]),
            dir.path().join("runbooks/db.md")
        );
        assert_eq!(
            manifest.resolve(&manifest.documents[1]),
            PathBuf::from("/srv/knowledge/outage.md")
        );
        assert_eq!(manifest.documents[1].doc_type, DocType::PreviousIncident);
    }

    #[test]
    fn test_unknown_doc_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            "documents:\n  - {service: a, title: b, doc_type: wiki, path: c.md}\n",
        );
        assert!(KnowledgeManifest::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_ingest_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("db.md"),
            "## Pool exhaustion\nRaise the pool size and add replicas.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.md"), "   \n").unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
documents:
  - {service: payment-service, title: Runbook, doc_type: runbook, path: db.md}
  - {service: payment-service, title: Missing, doc_type: technical, path: missing.md}
  - {service: payment-service, title: Empty, doc_type: guideline, path: empty.md}
"#,
        );

        let manifest = KnowledgeManifest::load(&path).unwrap();
        let summary = manifest.ingest(&ingestion()).await;

        assert_eq!(summary.ingested.len(), 1);
        assert_eq!(summary.ingested[0].status, DocumentStatus::Active);
        let failed: Vec<_> = summary.failed.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(failed, vec!["Missing", "Empty"]);
    }
}
