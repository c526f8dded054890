//! # SwKit Worker
//!
//! Offline delivery worker: a long-lived interception process that serves
//! previously fetched resources when the network is slow or gone.
//!
//! ## Features
//!
//! - **Precache**: populate a versioned cache at install, tolerating partial failure
//! - **Generations**: one live cache per version tag; stale ones removed on activation
//! - **Fetch strategies**: network-first for navigations, cache-first for assets
//! - **Fallbacks**: placeholder images, fonts, styles and scripts when both cache and network fail
//! - **Clients and notifications**: window claim, push display, notification click routing
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── install  ──► PrecacheLoader ───┐
//!     ├── activate ──► GenerationManager ┤
//!     ├── fetch    ──► FetchDispatcher ──┼──► CacheStorage
//!     │                    │             │       └── Cache (one per version tag)
//!     │                    ├── Fetcher ◄─┘              └── key → CacheEntry
//!     │                    └── fallback::synthesize
//!     └── push / notification_click ──► Clients, WorkerEvent channel
//! ```

use swkit_common::SwKitError;
use thiserror::Error;
use url::Url;

pub mod clients;
pub mod config;
pub mod dispatch;
pub mod fallback;
pub mod generation;
pub mod precache;
pub mod store;
pub mod worker;

pub use clients::{Client, ClientType, Clients};
pub use config::{NotificationConfig, QueryMatch, WorkerConfig};
pub use dispatch::{Bypass, Dispatched, FetchDispatcher, FetchOutcome, ResponseSource};
pub use generation::{ActivationReport, GenerationManager};
pub use precache::{PrecacheFailure, PrecacheLoader, PrecacheReport};
pub use store::{CacheEntry, CacheStorage, MatchOptions, StoreError, StoredHeader};
pub use worker::{Notification, OfflineWorker, ServiceWorkerState, StartReport, WorkerEvent};

/// Errors surfaced by the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: ServiceWorkerState,
        actual: ServiceWorkerState,
    },

    /// An offline navigation found no cached offline page.
    #[error("Offline page not cached: {0}")]
    OfflinePageMissing(Url),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] SwKitError),

    #[error("Client error: {0}")]
    Client(String),
}
