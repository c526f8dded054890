//! Install-time population of a cache generation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use swkit_net::{Fetcher, Request};
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatch::fetch_bounded;
use crate::store::{CacheEntry, CacheStorage, StoreError};

/// One manifest entry that did not make it into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub url: Url,
    pub reason: String,
}

/// Outcome of an install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    /// Generation that was populated.
    pub generation: String,
    /// Entries stored, in manifest order.
    pub cached: Vec<Url>,
    /// Entries that failed, in manifest order.
    pub failed: Vec<PrecacheFailure>,
}

impl PrecacheReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches and stores the precache manifest. Every entry is attempted
/// independently; a failed entry is logged and left for opportunistic caching.
pub struct PrecacheLoader {
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    timeout: Option<Duration>,
}

impl PrecacheLoader {
    pub fn new(storage: Arc<CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            storage,
            fetcher,
            timeout: None,
        }
    }

    /// Bound each manifest fetch.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the `generation` cache and populate it from `manifest`.
    ///
    /// Only a failure to open the cache is an error; per-entry failures end
    /// up in the report.
    pub async fn run(
        &self,
        generation: &str,
        manifest: &[Url],
    ) -> Result<PrecacheReport, StoreError> {
        self.storage.open(generation).await?;
        info!(generation = %generation, entries = manifest.len(), "Caching app shell");

        let attempts = manifest.iter().map(|url| self.precache_one(generation, url));
        let outcomes = join_all(attempts).await;

        let mut report = PrecacheReport {
            generation: generation.to_string(),
            ..Default::default()
        };
        for (url, outcome) in manifest.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.cached.push(url.clone()),
                Err(reason) => {
                    warn!(url = %url, reason = %reason, "Precache entry failed");
                    report.failed.push(PrecacheFailure {
                        url: url.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            generation = %generation,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Precache settled"
        );
        Ok(report)
    }

    async fn precache_one(&self, generation: &str, url: &Url) -> Result<(), String> {
        let request = Request::get(url.clone());
        let response = fetch_bounded(self.fetcher.as_ref(), &request, self.timeout)
            .await
            .map_err(|e| e.to_string())?;

        if !response.ok() {
            return Err(format!("bad status {}", response.status));
        }

        let entry = CacheEntry::from_response(&request, &response);
        self.storage
            .put(generation, entry)
            .await
            .map_err(|e| e.to_string())?;

        debug!(url = %url, "Precached");
        Ok(())
    }
}
