//! Failure injection shared by the mock connectors.

use crate::traits::{ConnectorError, ConnectorHealth, ConnectorResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Normal operation.
    #[default]
    Normal,
    /// Fail the first N calls, then behave normally.
    FailFirst { calls: u64, error: ConnectorError },
    /// Succeed for N calls, then fail.
    FailAfter { calls: u64, error: ConnectorError },
    /// Sleep before answering.
    Slow(Duration),
    /// Always fail.
    AlwaysFail(ConnectorError),
    /// Report unhealthy but keep answering.
    Unhealthy(String),
}

/// Call counter plus the configured behavior.
#[derive(Debug, Default)]
pub struct MockControl {
    behavior: RwLock<MockBehavior>,
    calls: AtomicU64,
}

impl MockControl {
    pub async fn set(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Number of calls observed so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Registers a call and applies the behavior to it.
    pub async fn check(&self) -> ConnectorResult<()> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.read().await.clone();

        match behavior {
            MockBehavior::Normal | MockBehavior::Unhealthy(_) => Ok(()),
            MockBehavior::FailFirst { calls, error } if count <= calls => Err(error),
            MockBehavior::FailFirst { .. } => Ok(()),
            MockBehavior::FailAfter { calls, error } if count > calls => Err(error),
            MockBehavior::FailAfter { .. } => Ok(()),
            MockBehavior::Slow(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            MockBehavior::AlwaysFail(error) => Err(error),
        }
    }

    pub async fn health(&self) -> ConnectorHealth {
        match &*self.behavior.read().await {
            MockBehavior::Unhealthy(reason) => ConnectorHealth::Unhealthy(reason.clone()),
            MockBehavior::AlwaysFail(_) => ConnectorHealth::Unhealthy("Always failing".into()),
            _ => ConnectorHealth::Healthy,
        }
    }

    pub fn reset_count(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}
