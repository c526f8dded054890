//! Per-request routing: network-first for navigations, cache-first for assets.

use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use swkit_common::with_timeout;
use swkit_net::{
    Fetcher, InterceptDecision, InterceptPolicy, NetError, PassReason, Request, Response,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{QueryMatch, WorkerConfig};
use crate::fallback;
use crate::store::{CacheEntry, CacheStorage, MatchOptions};
use crate::WorkerError;

/// Fetch with an optional upper bound; hitting the bound is a network failure.
pub(crate) async fn fetch_bounded(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response, NetError> {
    match timeout {
        Some(limit) => with_timeout(limit, || fetcher.fetch(request))
            .await
            .unwrap_or(Err(NetError::Timeout(limit))),
        None => fetcher.fetch(request).await,
    }
}

/// Why a request was left to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    /// Filtered out by the interception policy.
    Filtered(PassReason),
    /// The worker is not controlling pages yet.
    NotControlling,
}

/// Where a dispatched response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflinePage,
    /// Synthesized placeholder.
    Fallback,
}

/// A response produced by the worker.
#[derive(Debug)]
pub struct Dispatched {
    pub response: Response,
    pub source: ResponseSource,
    /// Detached write of a copy into the cache. Dropping the handle leaves
    /// the write running; its outcome never affects `response`.
    pub cache_write: Option<JoinHandle<()>>,
}

impl Dispatched {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self {
            response,
            source,
            cache_write: None,
        }
    }
}

/// Result of handling one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The host fetches the request itself, untouched.
    Passthrough { request: Request, reason: Bypass },
    /// The worker answered.
    Respond(Dispatched),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(dispatched) => Some(&dispatched.response),
            FetchOutcome::Passthrough { .. } => None,
        }
    }
}

/// Routes intercepted requests for one cache generation.
pub struct FetchDispatcher {
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    policy: InterceptPolicy,
    generation: String,
    offline_url: Url,
    asset_match: MatchOptions,
    timeout: Option<Duration>,
}

impl FetchDispatcher {
    pub fn new(
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        config: &WorkerConfig,
    ) -> swkit_common::Result<Self> {
        let asset_match = MatchOptions {
            ignore_search: config.query_match == QueryMatch::Ignore,
            ignore_method: false,
        };
        Ok(Self {
            storage,
            fetcher,
            policy: InterceptPolicy::new(&config.origin),
            generation: config.version.clone(),
            offline_url: config.offline_url()?,
            asset_match,
            timeout: config.fetch_timeout(),
        })
    }

    /// The generation this dispatcher reads and writes.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Handle one request.
    ///
    /// The only error is an offline navigation with no cached offline page;
    /// every asset request resolves to some response.
    pub async fn dispatch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        if let InterceptDecision::Passthrough(reason) = self.policy.decide(&request) {
            return Ok(FetchOutcome::Passthrough {
                request,
                reason: Bypass::Filtered(reason),
            });
        }

        let dispatched = if request.is_navigation() {
            self.navigate(&request).await?
        } else {
            self.asset(&request).await
        };
        Ok(FetchOutcome::Respond(dispatched))
    }

    /// Network-first. Successful navigations are not cached.
    async fn navigate(&self, request: &Request) -> Result<Dispatched, WorkerError> {
        match self.network(request).await {
            Ok(response) => Ok(Dispatched::new(response, ResponseSource::Network)),
            Err(e) => {
                info!(url = %request.url, error = %e, "Navigation failed, serving offline page");
                let page = self
                    .offline_page()
                    .await
                    .ok_or_else(|| WorkerError::OfflinePageMissing(self.offline_url.clone()))?;
                Ok(Dispatched::new(page, ResponseSource::OfflinePage))
            }
        }
    }

    /// Cache-first; on a miss, network with opportunistic caching, then
    /// placeholder content.
    async fn asset(&self, request: &Request) -> Dispatched {
        if let Some(entry) = self
            .storage
            .match_request(
                &self.generation,
                &request.method,
                &request.url,
                self.asset_match,
            )
            .await
        {
            match entry.to_response() {
                Ok(response) => {
                    debug!(url = %request.url, "Served from cache");
                    return Dispatched::new(response, ResponseSource::Cache);
                }
                Err(e) => warn!(url = %request.url, error = %e, "Unusable cache entry"),
            }
        }

        match self.network(request).await {
            Ok(response) => {
                let cache_write = response
                    .is_cacheable()
                    .then(|| self.spawn_cache_write(request, &response));
                Dispatched {
                    response,
                    source: ResponseSource::Network,
                    cache_write,
                }
            }
            Err(e) => {
                debug!(url = %request.url, destination = %request.destination, error = %e, "Asset unavailable");
                self.fallback(request).await
            }
        }
    }

    async fn fallback(&self, request: &Request) -> Dispatched {
        if let Some(placeholder) = fallback::synthesize(request.destination, &request.url) {
            debug!(url = %request.url, destination = %request.destination, "Serving placeholder");
            return Dispatched::new(placeholder, ResponseSource::Fallback);
        }
        if let Some(page) = self.offline_page().await {
            return Dispatched::new(page, ResponseSource::OfflinePage);
        }
        warn!(url = %request.url, offline_page = %self.offline_url, "No offline page cached");
        let unavailable = Response::with_content_type(
            request.url.clone(),
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain",
            "offline",
        );
        Dispatched::new(unavailable, ResponseSource::Fallback)
    }

    /// A per-request timeout overrides the configured bound.
    async fn network(&self, request: &Request) -> Result<Response, NetError> {
        let timeout = request.timeout.or(self.timeout);
        fetch_bounded(self.fetcher.as_ref(), request, timeout).await
    }

    async fn offline_page(&self) -> Option<Response> {
        let entry = self
            .storage
            .match_request(
                &self.generation,
                &Method::GET,
                &self.offline_url,
                MatchOptions::ignoring_search(),
            )
            .await?;
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "Unusable offline page entry");
                None
            }
        }
    }

    fn spawn_cache_write(&self, request: &Request, response: &Response) -> JoinHandle<()> {
        let entry = CacheEntry::from_response(request, response);
        let storage = Arc::clone(&self.storage);
        let generation = self.generation.clone();
        tokio::spawn(async move {
            let url = entry.url.clone();
            if let Err(e) = storage.put(&generation, entry).await {
                warn!(url = %url, generation = %generation, error = %e, "Cache write failed");
            }
        })
    }
}
