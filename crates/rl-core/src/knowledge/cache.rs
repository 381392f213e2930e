//! Per-service cache of retrieval candidate sets.
//!
//! An entry is served only while its revision equals the store's current
//! revision for that service, so a write is visible to the very next
//! retrieval even if the explicit invalidation has not run yet.

use super::store::CandidateSet;
use metrics::counter;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_services")]
    pub max_services: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_services() -> u64 {
    1_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_secs: default_ttl_secs(),
            max_services: default_max_services(),
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

pub struct RetrievalCache {
    cache: Cache<String, Arc<CandidateSet>>,
    enabled: bool,
}

impl RetrievalCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .max_capacity(config.max_services)
            .build();
        Self {
            cache,
            enabled: config.enabled,
        }
    }

    /// Cached set for `service`, if it was built at `current_revision`.
    pub async fn get(&self, service: &str, current_revision: u64) -> Option<Arc<CandidateSet>> {
        if !self.enabled {
            return None;
        }

        match self.cache.get(service).await {
            Some(set) if set.revision == current_revision => {
                counter!("rootline_retrieval_cache_hits_total").increment(1);
                trace!(service = %service, revision = current_revision, "Candidate cache hit");
                Some(set)
            }
            Some(set) => {
                trace!(
                    service = %service,
                    cached = set.revision,
                    current = current_revision,
                    "Dropping stale candidate set"
                );
                self.cache.invalidate(service).await;
                counter!("rootline_retrieval_cache_misses_total").increment(1);
                None
            }
            None => {
                counter!("rootline_retrieval_cache_misses_total").increment(1);
                None
            }
        }
    }

    pub async fn insert(&self, set: Arc<CandidateSet>) {
        if self.enabled {
            self.cache.insert(set.service.clone(), set).await;
        }
    }

    pub async fn invalidate(&self, service: &str) {
        self.cache.invalidate(service).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
