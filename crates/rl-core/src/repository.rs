//! Persistence of investigation records.
//!
//! One record per `incident_id`: saving a new run for a known incident
//! replaces the previous record. Records are stored as typed structures
//! (one JSON document per incident on disk), never as nested JSON strings.

use crate::investigation::{InvestigationPhase, InvestigationState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Filter for listing investigations.
#[derive(Debug, Clone, Default)]
pub struct InvestigationFilter {
    pub service: Option<String>,
    pub phase: Option<InvestigationPhase>,
    pub limit: Option<usize>,
}

impl InvestigationFilter {
    fn matches(&self, state: &InvestigationState) -> bool {
        self.service
            .as_deref()
            .map_or(true, |s| state.incident.service == s)
            && self.phase.map_or(true, |p| state.phase == p)
    }
}

#[async_trait]
pub trait InvestigationRepository: Send + Sync {
    /// Inserts or replaces the record for the state's incident.
    /// Returns true when an existing record was replaced.
    async fn upsert(&self, state: &InvestigationState) -> RepositoryResult<bool>;

    async fn get(&self, incident_id: Uuid) -> RepositoryResult<Option<InvestigationState>>;

    /// Newest first.
    async fn list(&self, filter: &InvestigationFilter) -> RepositoryResult<Vec<InvestigationState>>;

    async fn count(&self) -> RepositoryResult<u64>;
}

/// In-memory repository for tests and single-process runs.
pub struct InMemoryInvestigationRepository {
    records: Arc<RwLock<HashMap<Uuid, InvestigationState>>>,
}

impl InMemoryInvestigationRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryInvestigationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvestigationRepository for InMemoryInvestigationRepository {
    async fn upsert(&self, state: &InvestigationState) -> RepositoryResult<bool> {
        let mut records = self.records.write().await;
        Ok(records.insert(state.incident_id(), state.clone()).is_some())
    }

    async fn get(&self, incident_id: Uuid) -> RepositoryResult<Option<InvestigationState>> {
        Ok(self.records.read().await.get(&incident_id).cloned())
    }

    async fn list(&self, filter: &InvestigationFilter) -> RepositoryResult<Vec<InvestigationState>> {
        let records = self.records.read().await;
        let mut results: Vec<InvestigationState> = records
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn count(&self) -> RepositoryResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}

/// Directory-backed repository: `<dir>/<incident_id>.json`.
pub struct FileInvestigationRepository {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileInvestigationRepository {
    pub async fn open(dir: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, incident_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", incident_id))
    }

    async fn read_all(&self) -> RepositoryResult<Vec<InvestigationState>> {
        let mut states = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            states.push(serde_json::from_slice(&bytes)?);
        }
        Ok(states)
    }
}

#[async_trait]
impl InvestigationRepository for FileInvestigationRepository {
    async fn upsert(&self, state: &InvestigationState) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(state.incident_id());
        let existed = tokio::fs::try_exists(&path).await?;

        // write-then-rename so readers never see a half-written record
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(existed)
    }

    async fn get(&self, incident_id: Uuid) -> RepositoryResult<Option<InvestigationState>> {
        match tokio::fs::read(self.path_for(incident_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, filter: &InvestigationFilter) -> RepositoryResult<Vec<InvestigationState>> {
        let mut results: Vec<InvestigationState> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn count(&self) -> RepositoryResult<u64> {
        Ok(self.read_all().await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentEvent;
    use chrono::{Duration, Utc};

    fn state(service: &str) -> InvestigationState {
        InvestigationState::new(
            IncidentEvent::from_chat(service, "why is latency up?"),
            Utc::now() + Duration::minutes(5),
        )
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_record() {
        let repo = InMemoryInvestigationRepository::new();
        let first = state("payments");
        assert!(!repo.upsert(&first).await.unwrap());

        let mut rerun = InvestigationState::new(first.incident.clone(), first.deadline);
        rerun.notes.push("second run".to_string());
        assert!(repo.upsert(&rerun).await.unwrap());

        assert_eq!(repo.count().await.unwrap(), 1);
        let stored = repo.get(first.incident_id()).await.unwrap().unwrap();
        assert_eq!(stored.notes, vec!["second run".to_string()]);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = InMemoryInvestigationRepository::new();
        repo.upsert(&state("payments")).await.unwrap();
        repo.upsert(&state("payments")).await.unwrap();
        repo.upsert(&state("search")).await.unwrap();

        let filter = InvestigationFilter {
            service: Some("payments".into()),
            ..Default::default()
        };
        assert_eq!(repo.list(&filter).await.unwrap().len(), 2);

        let filter = InvestigationFilter {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(repo.list(&filter).await.unwrap().len(), 1);

        let filter = InvestigationFilter {
            phase: Some(InvestigationPhase::Complete),
            ..Default::default()
        };
        assert!(repo.list(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_repository_upsert_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileInvestigationRepository::open(dir.path().join("runs"))
            .await
            .unwrap();

        let first = state("payments");
        assert!(!repo.upsert(&first).await.unwrap());
        let mut rerun = InvestigationState::new(first.incident.clone(), first.deadline);
        rerun.notes.push("rerun".to_string());
        assert!(repo.upsert(&rerun).await.unwrap());
        repo.upsert(&state("search")).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        let stored = repo.get(first.incident_id()).await.unwrap().unwrap();
        assert_eq!(stored.notes, vec!["rerun".to_string()]);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());

        let reopened = FileInvestigationRepository::open(dir.path().join("runs"))
            .await
            .unwrap();
        let filter = InvestigationFilter {
            service: Some("search".into()),
            ..Default::default()
        };
        assert_eq!(reopened.list(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_survives_json_round_trip() {
        let original = state("payments");
        let json = serde_json::to_value(&original).unwrap();
        // sections are nested objects, never strings holding JSON
        assert!(json["incident"].is_object());
        let back: InvestigationState = serde_json::from_value(json).unwrap();
        assert_eq!(back.incident_id(), original.incident_id());
    }
}
