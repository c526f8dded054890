//! Cache generation lifecycle: one live cache per version tag.

use std::sync::Arc;

use futures::future::join_all;
use swkit_common::{retry_with_backoff, RetryConfig};
use tracing::{error, info};

use crate::store::{CacheStorage, StoreError};

/// Result of retiring superseded generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// The live generation.
    pub current: String,
    /// Generations deleted.
    pub removed: Vec<String>,
    /// Generations that could not be deleted, with the last error.
    pub failed: Vec<(String, String)>,
}

/// Owns the mapping from version tag to the one live cache. The only
/// component that deletes caches.
#[derive(Debug, Clone)]
pub struct GenerationManager {
    storage: Arc<CacheStorage>,
    retry: RetryConfig,
}

impl GenerationManager {
    pub fn new(storage: Arc<CacheStorage>, retry: RetryConfig) -> Self {
        Self { storage, retry }
    }

    /// Delete every cache not named `current`, then make sure `current` exists.
    ///
    /// Deletions run concurrently and all settle before this returns. Only
    /// transient failures are retried. A generation that cannot be removed is
    /// reported, not fatal: it is unreachable by name from now on.
    pub async fn activate(&self, current: &str) -> Result<ActivationReport, StoreError> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            let result = retry_with_backoff(&self.retry, || self.storage.delete(name)).await;
            (name.clone(), result)
        });

        let mut report = ActivationReport {
            current: current.to_string(),
            ..Default::default()
        };

        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => {
                    info!(generation = %name, "Removed old cache generation");
                    report.removed.push(name);
                }
                Err(e) => {
                    error!(generation = %name, error = %e, "Failed to remove old cache generation");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        self.storage.open(current).await?;
        info!(
            generation = %current,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Cache generation live"
        );
        Ok(report)
    }
}
