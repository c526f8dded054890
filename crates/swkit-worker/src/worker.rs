//! The long-lived worker process: lifecycle state machine and entry points.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swkit_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientType, Clients};
use crate::config::WorkerConfig;
use crate::dispatch::{Bypass, FetchDispatcher, FetchOutcome};
use crate::generation::{ActivationReport, GenerationManager};
use crate::precache::{PrecacheLoader, PrecacheReport};
use crate::store::CacheStorage;
use crate::WorkerError;

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Configured, nothing run yet.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Retiring old generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install or activation failed.
    Redundant,
}

/// A notification for the host to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

/// Worker events.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        version: String,
        state: ServiceWorkerState,
    },
    /// A superseded generation was deleted.
    GenerationRemoved { name: String },
    /// Display a notification.
    ShowNotification(Notification),
    /// An existing window was focused.
    ClientFocused { client_id: String },
    /// A new window was opened.
    WindowOpened { client_id: String, url: Url },
}

/// Outcome of [`OfflineWorker::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub precache: PrecacheReport,
    /// `None` when the worker is left waiting.
    pub activation: Option<ActivationReport>,
}

/// Offline delivery worker.
///
/// Entry points: [`install`](Self::install), [`activate`](Self::activate),
/// [`fetch`](Self::fetch), [`push`](Self::push) and
/// [`notification_click`](Self::notification_click).
pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    dispatcher: FetchDispatcher,
    state: RwLock<ServiceWorkerState>,
    clients: Arc<RwLock<Clients>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Create a worker in the `Parsed` state.
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = FetchDispatcher::new(storage.clone(), fetcher.clone(), &config)?;

        Ok((
            Self {
                config,
                storage,
                fetcher,
                dispatcher,
                state: RwLock::new(ServiceWorkerState::Parsed),
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    /// Controlled clients.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        self.clients.clone()
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Precache the manifest into the current generation.
    pub async fn install(&self) -> Result<PrecacheReport, WorkerError> {
        let manifest = self.config.precache_urls()?;
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)
            .await?;

        let loader = PrecacheLoader::new(self.storage.clone(), self.fetcher.clone())
            .with_timeout(self.config.fetch_timeout());
        match loader.run(&self.config.version, &manifest).await {
            Ok(report) => {
                self.set_state(ServiceWorkerState::Installed).await;
                Ok(report)
            }
            Err(e) => {
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(e.into())
            }
        }
    }

    /// Retire every other generation and take control of window clients.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)
            .await?;

        let manager = GenerationManager::new(self.storage.clone(), self.config.delete_retry());
        let report = match manager.activate(&self.config.version).await {
            Ok(report) => report,
            Err(e) => {
                self.set_state(ServiceWorkerState::Redundant).await;
                return Err(e.into());
            }
        };

        for name in &report.removed {
            self.emit(WorkerEvent::GenerationRemoved { name: name.clone() });
        }
        self.take_control().await;
        Ok(report)
    }

    /// Install, then activate unless `skip_waiting` is off.
    pub async fn start(&self) -> Result<StartReport, WorkerError> {
        let precache = self.install().await?;
        let activation = if self.config.skip_waiting {
            Some(self.activate().await?)
        } else {
            debug!(version = %self.config.version, "Waiting for activation");
            None
        };
        Ok(StartReport {
            precache,
            activation,
        })
    }

    /// Resume a previously activated generation without precaching again.
    ///
    /// Returns `false`, leaving the worker `Parsed`, when storage holds no
    /// cache for the current version.
    pub async fn resume(&self) -> Result<bool, WorkerError> {
        let state = self.state().await;
        if state != ServiceWorkerState::Parsed {
            return Err(WorkerError::InvalidState {
                expected: ServiceWorkerState::Parsed,
                actual: state,
            });
        }
        if !self.storage.has(&self.config.version).await {
            debug!(version = %self.config.version, "No cache to resume");
            return Ok(false);
        }
        self.take_control().await;
        Ok(true)
    }

    /// Handle an intercepted request.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        if self.state().await != ServiceWorkerState::Activated {
            return Ok(FetchOutcome::Passthrough {
                request,
                reason: Bypass::NotControlling,
            });
        }
        self.dispatcher.dispatch(request).await
    }

    /// Handle a push message: show a notification with the payload text.
    pub fn push(&self, payload: Option<&str>) -> Notification {
        let settings = &self.config.notification;
        let body = payload
            .filter(|text| !text.is_empty())
            .unwrap_or(settings.default_body.as_str())
            .to_string();

        let notification = Notification {
            title: settings.title.clone(),
            body,
            icon: settings.icon.clone(),
            badge: settings.badge.clone(),
        };
        self.emit(WorkerEvent::ShowNotification(notification.clone()));
        notification
    }

    /// Handle a notification click: focus a window already showing the
    /// configured page, or open one.
    pub async fn notification_click(&self) -> Result<WorkerEvent, WorkerError> {
        let target = self.config.resolve(&self.config.notification.open_url)?;
        let controller = self.controller().await;
        let mut clients = self.clients.write().await;

        let existing = clients
            .match_all(Some(ClientType::Window))
            .into_iter()
            .find(|c| c.url.path() == target.path())
            .map(|c| c.id.clone());

        let event = match existing.and_then(|id| clients.get_mut(&id)) {
            Some(client) => {
                client.focus()?;
                WorkerEvent::ClientFocused {
                    client_id: client.id.clone(),
                }
            }
            None => {
                let client = clients.open_window(target, controller);
                WorkerEvent::WindowOpened {
                    client_id: client.id,
                    url: client.url,
                }
            }
        };
        self.emit(event.clone());
        Ok(event)
    }

    /// Version tag controlling new clients, once activated.
    async fn controller(&self) -> Option<String> {
        (self.state().await == ServiceWorkerState::Activated).then(|| self.config.version.clone())
    }

    async fn take_control(&self) {
        self.set_state(ServiceWorkerState::Activated).await;
        let claimed = self.clients.write().await.claim(&self.config.version);
        info!(version = %self.config.version, claimed, "Controlling clients");
    }

    async fn transition(
        &self,
        expected: ServiceWorkerState,
        next: ServiceWorkerState,
    ) -> Result<(), WorkerError> {
        {
            let mut state = self.state.write().await;
            if *state != expected {
                return Err(WorkerError::InvalidState {
                    expected,
                    actual: *state,
                });
            }
            *state = next;
        }
        self.announce(next);
        Ok(())
    }

    async fn set_state(&self, next: ServiceWorkerState) {
        *self.state.write().await = next;
        self.announce(next);
    }

    fn announce(&self, state: ServiceWorkerState) {
        info!(version = %self.config.version, state = ?state, "Worker state changed");
        self.emit(WorkerEvent::StateChange {
            version: self.config.version.clone(),
            state,
        });
    }

    fn emit(&self, event: WorkerEvent) {
        // A host that dropped the receiver is not listening.
        let _ = self.event_tx.send(event);
    }
}
