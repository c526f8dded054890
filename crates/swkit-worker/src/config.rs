//! Worker configuration, loaded once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swkit_common::{Result, RetryConfig, SwKitError};
use url::Url;

/// How query strings take part in cache lookups for assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMatch {
    /// `/app.js?v=2` matches a stored `/app.js`.
    #[default]
    Ignore,
    /// The query string is part of the key.
    Exact,
}

/// Push notification presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title.
    pub title: String,
    /// Body used when the push carries no text.
    pub default_body: String,
    /// Icon path.
    pub icon: Option<String>,
    /// Badge path.
    pub badge: Option<String>,
    /// Path focused or opened on notification click.
    pub open_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Update".to_string(),
            default_body: "New update available".to_string(),
            icon: None,
            badge: None,
            open_url: "/".to_string(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Version tag; names the current cache generation.
    pub version: String,

    /// Origin the worker is served from.
    pub origin: Url,

    /// Precache manifest (absolute paths, in order).
    pub precache: Vec<String>,

    /// Offline fallback page path.
    pub offline_page: String,

    /// Query-string handling for asset lookups.
    #[serde(default)]
    pub query_match: QueryMatch,

    /// Upper bound on a single network fetch, in milliseconds.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,

    /// Activate as soon as install settles.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Directory for disk-backed cache storage.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Byte budget for all caches.
    #[serde(default)]
    pub quota_bytes: Option<u64>,

    /// Attempts to delete each superseded generation.
    #[serde(default = "default_delete_retries")]
    pub delete_retries: u32,

    /// Push notification presentation.
    #[serde(default)]
    pub notification: NotificationConfig,
}

fn default_true() -> bool {
    true
}

fn default_delete_retries() -> u32 {
    3
}

impl WorkerConfig {
    /// Minimal config: the offline page is the only precached resource.
    pub fn new(version: impl Into<String>, origin: Url, offline_page: impl Into<String>) -> Self {
        let offline_page = offline_page.into();
        Self {
            version: version.into(),
            origin,
            precache: vec![offline_page.clone()],
            offline_page,
            query_match: QueryMatch::default(),
            fetch_timeout_ms: None,
            skip_waiting: true,
            storage_dir: None,
            quota_bytes: None,
            delete_retries: default_delete_retries(),
            notification: NotificationConfig::default(),
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SwKitError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SwKitError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json(&json)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(SwKitError::config("version tag must not be empty"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(SwKitError::config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for path in &self.precache {
            check_path("precache entry", path)?;
            if !seen.insert(path.as_str()) {
                return Err(SwKitError::config(format!(
                    "duplicate precache entry: {}",
                    path
                )));
            }
        }

        check_path("offline page", &self.offline_page)?;
        if !seen.contains(self.offline_page.as_str()) {
            return Err(SwKitError::config(format!(
                "offline page {} is not in the precache manifest",
                self.offline_page
            )));
        }
        check_path("notification open_url", &self.notification.open_url)?;
        Ok(())
    }

    /// Resolve a path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| SwKitError::config_with_source(format!("bad path {}", path), e))
    }

    /// Absolute URLs of the precache manifest, in order.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the offline fallback page.
    pub fn offline_url(&self) -> Result<Url> {
        self.resolve(&self.offline_page)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    pub fn delete_retry(&self) -> RetryConfig {
        RetryConfig::attempts(self.delete_retries)
    }
}

fn check_path(what: &str, path: &str) -> Result<()> {
    if path.starts_with('/') && !path.starts_with("//") {
        Ok(())
    } else {
        Err(SwKitError::config(format!(
            "{} must be an absolute path: {}",
            what, path
        )))
    }
}
