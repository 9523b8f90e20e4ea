//! External service catalog client
//!
//! The catalog declares which services are enabled for the public status
//! surface and which sub-components coalesce into a status-page parent.
//! Lookups go through a process-wide snapshot cache with a time-based
//! refresh; once a snapshot exists, a stale one is preferred over blocking
//! the workers on upstream failure. Before the first successful fetch there
//! is nothing to fall back on, so lookups fail and the caller retries.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The catalog could not answer: the upstream is unreachable and no snapshot
/// has ever been fetched. Transient; a later attempt may succeed.
#[derive(Debug, Error)]
#[error("catalog unavailable: {0}")]
pub struct CatalogError(pub String);

/// Read surface the normalizer depends on. Concurrency-safe; implementations
/// must tolerate many workers calling concurrently.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Whether the service is enabled for the public status surface
    async fn is_service_enabled(&self, service: &str) -> Result<bool, CatalogError>;

    /// The declared status-page parent for a sub-component, if any
    async fn status_page_parent(&self, service: &str) -> Result<Option<String>, CatalogError>;
}

/// One catalog entry as returned by the upstream API
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub status_page_parent: Option<String>,
}

/// Response envelope of the catalog listing endpoint
#[derive(Debug, Deserialize)]
struct CatalogResponse {
    resources: Vec<CatalogEntry>,
}

/// Point-in-time view of the catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    enabled_services: HashSet<String>,
    status_page_parents: HashMap<String, String>,
}

impl CatalogSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        for entry in entries {
            let name = entry.name.to_ascii_lowercase();
            if entry.enabled {
                snapshot.enabled_services.insert(name.clone());
            }
            if let Some(parent) = entry.status_page_parent {
                snapshot
                    .status_page_parents
                    .insert(name, parent.to_ascii_lowercase());
            }
        }
        snapshot
    }

    pub fn is_service_enabled(&self, service: &str) -> bool {
        self.enabled_services.contains(service)
    }

    pub fn status_page_parent(&self, service: &str) -> Option<String> {
        self.status_page_parents.get(service).cloned()
    }
}

struct CacheState {
    snapshot: Option<CatalogSnapshot>,
    valid_until: Option<Instant>,
}

impl CacheState {
    fn fresh(&self) -> Option<CatalogSnapshot> {
        match (&self.snapshot, self.valid_until) {
            (Some(snapshot), Some(until)) if Instant::now() < until => Some(snapshot.clone()),
            _ => None,
        }
    }
}

/// HTTP catalog client with a time-based snapshot cache
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    refresh: Duration,
    cache: RwLock<CacheState>,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, refresh: Duration) -> HttpCatalog {
        HttpCatalog {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            refresh,
            cache: RwLock::new(CacheState {
                snapshot: None,
                valid_until: None,
            }),
        }
    }

    async fn fetch(&self) -> Result<CatalogSnapshot, reqwest::Error> {
        let url = format!("{}/resources", self.base_url.trim_end_matches('/'));
        let response: CatalogResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(CatalogSnapshot::from_entries(response.resources))
    }

    /// Current snapshot, refreshing if stale. A failed refresh keeps serving
    /// the previous snapshot; a failed first fetch is an error, never an
    /// empty snapshot.
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.fresh() {
                return Ok(snapshot);
            }
        }

        let mut cache = self.cache.write().await;
        // Another worker may have refreshed while we waited for the lock
        if let Some(snapshot) = cache.fresh() {
            return Ok(snapshot);
        }

        match self.fetch().await {
            Ok(snapshot) => {
                debug!("Catalog snapshot refreshed");
                cache.snapshot = Some(snapshot.clone());
                cache.valid_until = Some(Instant::now() + self.refresh);
                Ok(snapshot)
            }
            Err(e) => match cache.snapshot.clone() {
                Some(stale) => {
                    warn!("Catalog refresh failed, serving stale snapshot: {}", e);
                    // Retry within the shorter of a minute and the refresh
                    // interval so workers neither hammer a down catalog on
                    // every message nor wait a full interval to recover.
                    let retry_delay = Duration::from_secs(60).min(self.refresh);
                    cache.valid_until = Some(Instant::now() + retry_delay);
                    Ok(stale)
                }
                None => {
                    warn!("Catalog fetch failed with no snapshot to fall back on: {}", e);
                    Err(CatalogError(e.to_string()))
                }
            },
        }
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn is_service_enabled(&self, service: &str) -> Result<bool, CatalogError> {
        Ok(self.snapshot().await?.is_service_enabled(service))
    }

    async fn status_page_parent(&self, service: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.snapshot().await?.status_page_parent(service))
    }
}

/// Fixed in-memory catalog for tests and bootstrap
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    snapshot: CatalogSnapshot,
}

impl StaticCatalog {
    pub fn new(enabled: &[&str], parents: &[(&str, &str)]) -> StaticCatalog {
        let entries = enabled
            .iter()
            .map(|name| CatalogEntry {
                name: name.to_string(),
                enabled: true,
                status_page_parent: None,
            })
            .chain(parents.iter().map(|(child, parent)| CatalogEntry {
                name: child.to_string(),
                enabled: false,
                status_page_parent: Some(parent.to_string()),
            }));
        StaticCatalog {
            snapshot: CatalogSnapshot::from_entries(entries),
        }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn is_service_enabled(&self, service: &str) -> Result<bool, CatalogError> {
        Ok(self.snapshot.is_service_enabled(service))
    }

    async fn status_page_parent(&self, service: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.snapshot.status_page_parent(service))
    }
}
