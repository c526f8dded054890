//! Shared fixtures: a scripted in-memory network and a small site.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use swkit_net::{Fetcher, NetError, Request, Response, ResponseType};
use swkit_worker::{CacheStorage, OfflineWorker, WorkerConfig, WorkerEvent};
use tokio::sync::mpsc;
use url::Url;

pub const ORIGIN: &str = "https://drspalate.example";
pub const VERSION: &str = "drspalate-v2";
pub const OFFLINE_BODY: &str = "<h1>You are offline</h1>";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("swkit_worker=debug")
        .with_test_writer()
        .try_init();
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
}

/// In-memory network keyed by URL path, with failure injection and a call
/// counter.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with a 200 at `path`.
    pub fn route(&self, path: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.route_status(path, StatusCode::OK, content_type, body);
    }

    pub fn route_status(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                content_type,
                body: body.into(),
            },
        );
    }

    /// Make every fetch of `path` fail at the network level.
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every response.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.seen.lock().unwrap().clear();
    }

    /// Paths fetched, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = request.url.path().to_string();
        self.seen.lock().unwrap().push(path.clone());

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        if self.failing.lock().unwrap().contains(&path) {
            return Err(NetError::RequestFailed(format!("connection reset: {}", path)));
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        let mut response = match route {
            Some(route) => Response::new(request.url.clone(), route.status, route.body).header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(route.content_type),
            ),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        };
        if request.url.origin() != Url::parse(ORIGIN).unwrap().origin() {
            response.response_type = ResponseType::Cors;
        }
        Ok(response)
    }
}

/// The restaurant site: shell, manifest, offline page and a few assets.
pub fn site() -> Arc<ScriptedFetcher> {
    let fetcher = ScriptedFetcher::new();
    fetcher.route("/", "text/html", "<h1>Dr's Palate</h1>");
    fetcher.route("/index.html", "text/html", "<h1>Dr's Palate</h1>");
    fetcher.route("/manifest.json", "application/manifest+json", "{\"name\":\"Dr's Palate\"}");
    fetcher.route("/offline.html", "text/html", OFFLINE_BODY);
    fetcher.route("/menu.html", "text/html", "<h1>Menu</h1>");
    fetcher.route("/styles/global.css", "text/css", "body { margin: 0 }");
    fetcher.route("/scripts/app.js", "text/javascript", "console.log('hi')");
    fetcher.route("/images/hero.png", "image/png", vec![0x89, b'P', b'N', b'G']);
    Arc::new(fetcher)
}

pub fn config(precache: &[&str]) -> WorkerConfig {
    let mut config = WorkerConfig::new(VERSION, Url::parse(ORIGIN).unwrap(), "/offline.html");
    config.precache = precache.iter().map(|p| p.to_string()).collect();
    config.delete_retries = 1;
    config
}

pub struct Harness {
    pub worker: OfflineWorker,
    pub storage: Arc<CacheStorage>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl Harness {
    pub fn new(config: WorkerConfig, storage: CacheStorage, fetcher: Arc<ScriptedFetcher>) -> Self {
        init_tracing();
        let storage = Arc::new(storage);
        let (worker, events) =
            OfflineWorker::new(Arc::new(config), storage.clone(), fetcher.clone()).unwrap();
        Self {
            worker,
            storage,
            fetcher,
            events,
        }
    }

    /// Installed and activated against the default site.
    pub async fn started(precache: &[&str]) -> Self {
        let harness = Self::new(config(precache), CacheStorage::in_memory(), site());
        harness.worker.start().await.unwrap();
        harness.fetcher.reset_calls();
        harness
    }

    pub fn drain_events(&mut self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn cached_paths(&self) -> Vec<String> {
        self.storage
            .entries(VERSION)
            .await
            .into_iter()
            .map(|key| {
                let url = key.split_once(' ').map(|(_, u)| u).unwrap_or(key.as_str());
                Url::parse(url).unwrap().path().to_string()
            })
            .collect()
    }
}
