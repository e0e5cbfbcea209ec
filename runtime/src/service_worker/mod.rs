//! Service Worker Module
//!
//! Implements the offline cache worker: generation install/activation and
//! request interception against a versioned cache.

mod cache;
mod config;
mod fetch;
mod lifecycle;
mod network;
mod strategy;

pub use cache::*;
pub use config::*;
pub use fetch::*;
pub use lifecycle::*;
pub use network::*;
pub use strategy::*;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use spin::RwLock;
use url::Url;

/// Service Worker global ID counter
static NEXT_SW_ID: AtomicU64 = AtomicU64::new(1);

/// Service Worker ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    /// Create a new unique ID
    pub fn new() -> Self {
        Self(NEXT_SW_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get raw value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw#{}", self.0)
    }
}

/// Install failure. The generation is not committed and the previous one
/// stays current.
#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("{url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Service Worker error types
#[derive(thiserror::Error, Debug)]
pub enum ServiceWorkerError {
    #[error("install failed: {0}")]
    Install(#[from] InstallError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("worker for {worker} cannot control {container}")]
    OriginMismatch { worker: String, container: String },
}

/// What an install committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Generation tag
    pub generation: String,
    /// Number of manifest entries stored
    pub cached: usize,
    /// Payload bytes stored
    pub bytes: usize,
}

/// What an activation removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// Generation now serving requests
    pub generation: String,
    /// Superseded generations that were deleted
    pub deleted: Vec<String>,
}

/// Lifecycle events delivered by the host
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
}

/// Result of a dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Fetched(FetchOutcome),
}

/// Worker built with the strategy selected by crate features
pub type DefaultServiceWorker = ServiceWorker<DefaultStrategy>;

/// A Service Worker instance.
///
/// Owns one cache generation, named by `config.version`. All operations take
/// `&self`, so one worker behind an `Arc` serves concurrent requests.
pub struct ServiceWorker<S: FetchStrategy = DefaultStrategy> {
    /// Unique identifier
    id: ServiceWorkerId,
    /// Configuration
    config: WorkerConfig,
    /// Resolved seed set
    manifest: Vec<Request>,
    /// Artifact store shared with other workers of this origin
    store: Arc<dyn CacheStore>,
    /// Live fetch primitive
    network: Arc<dyn Network>,
    /// State machine
    lifecycle: LifecycleManager,
    /// Freshness policy
    strategy: S,
}

impl<S: FetchStrategy> std::fmt::Debug for ServiceWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: FetchStrategy> ServiceWorker<S> {
    /// Create a new service worker. Fails if the config does not validate.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let manifest = config.manifest_requests()?;

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            manifest,
            store,
            network,
            lifecycle: LifecycleManager::new(),
            strategy: S::default(),
        })
    }

    /// Get the worker ID
    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    /// Get the configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Generation tag this worker owns
    pub fn generation(&self) -> &str {
        &self.config.version
    }

    /// Name of the compiled-in strategy
    pub fn strategy_name(&self) -> &'static str {
        S::NAME
    }

    /// Get current state
    pub fn state(&self) -> ServiceWorkerState {
        self.lifecycle.state()
    }

    /// Check if the worker is active
    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Active
    }

    /// Whether the worker has claimed open clients
    pub fn is_controlling(&self) -> bool {
        self.lifecycle.is_controlling()
    }

    /// Lifecycle events and listeners
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Fetch the manifest set and commit it as this worker's generation.
    ///
    /// All fetches run concurrently. Nothing is written unless every one of
    /// them returns an OK response; on failure the worker goes back to
    /// `Uninstalled` and may be installed again.
    pub async fn install(&self) -> Result<InstallReport, InstallError> {
        self.lifecycle.transition(ServiceWorkerState::Installing)?;

        match self.precache().await {
            Ok(report) => {
                self.lifecycle.transition(ServiceWorkerState::Installed)?;
                log::info!(
                    "[SW] {} installed {} ({} entries, {} bytes)",
                    self.id,
                    report.generation,
                    report.cached,
                    report.bytes
                );
                Ok(report)
            }
            Err(e) => {
                log::warn!("[SW] {} install of {} failed: {}", self.id, self.generation(), e);
                self.lifecycle.transition(ServiceWorkerState::Uninstalled)?;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<InstallReport, InstallError> {
        let fetches = self.manifest.iter().map(|request| async move {
            let response =
                self.network
                    .fetch(request)
                    .await
                    .map_err(|source| InstallError::Fetch {
                        url: request.url.to_string(),
                        source,
                    })?;
            if !response.ok() {
                return Err(InstallError::BadStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            Ok::<_, InstallError>((request.key(), response))
        });
        let entries = try_join_all(fetches).await?;

        let cached = entries.len();
        let bytes: usize = entries.iter().map(|(_, r)| r.body_len()).sum();

        self.store.put_all(self.generation(), entries).await?;
        log::info!("[SW] Cache opened: {}", self.generation());

        Ok(InstallReport {
            generation: self.generation().to_string(),
            cached,
            bytes,
        })
    }

    /// Delete every other generation, become authoritative and claim
    /// open clients.
    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        let state = self.state();
        if state != ServiceWorkerState::Installed {
            return Err(LifecycleError::InvalidStateTransition {
                from: state,
                to: ServiceWorkerState::Active,
            });
        }

        let deleted = self.delete_stale_generations().await;
        self.lifecycle.transition(ServiceWorkerState::Active)?;
        self.lifecycle.claim()?;

        log::info!("[SW] {} activated {}", self.id, self.generation());
        Ok(ActivationReport {
            generation: self.generation().to_string(),
            deleted,
        })
    }

    async fn delete_stale_generations(&self) -> Vec<String> {
        let tags = match self.store.keys().await {
            Ok(tags) => tags,
            Err(e) => {
                log::warn!("[SW] Could not enumerate cache generations: {}", e);
                return Vec::new();
            }
        };

        let deletions = tags
            .into_iter()
            .filter(|tag| tag != self.generation())
            .map(|tag| async move {
                log::info!("[SW] Deleting stale cache generation: {}", tag);
                let result = self.store.delete(&tag).await;
                (tag, result)
            });

        join_all(deletions)
            .await
            .into_iter()
            .filter_map(|(tag, result)| match result {
                Ok(_) => Some(tag),
                Err(e) => {
                    log::warn!("[SW] Failed to delete generation {}: {}", tag, e);
                    None
                }
            })
            .collect()
    }

    /// Mark this worker as superseded. It stops intercepting requests.
    pub fn retire(&self) -> Result<(), LifecycleError> {
        self.lifecycle.transition(ServiceWorkerState::Redundant)
    }

    /// Offer a request to the worker.
    ///
    /// Non-`GET` requests, and every request while the worker is not
    /// active, come back as [`FetchOutcome::Passthrough`] without touching
    /// the store.
    pub async fn handle(&self, request: Request) -> Result<FetchOutcome, FetchError> {
        if !request.method.is_intercepted() {
            log::trace!("[SW] Passthrough {} {}", request.method, request.url);
            return Ok(FetchOutcome::Passthrough(request));
        }
        if !self.is_active() {
            return Ok(FetchOutcome::Passthrough(request));
        }

        let ctx = FetchContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.network),
            self.generation(),
            self.config.policy,
        );
        let response = self.strategy.respond(&ctx, &request).await?;
        Ok(FetchOutcome::Responded(response))
    }

    /// Route a host lifecycle event to the matching operation.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        match event {
            WorkerEvent::Install => Ok(EventOutcome::Installed(self.install().await?)),
            WorkerEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.handle(request).await?)),
        }
    }
}

/// Service Worker Container
///
/// Holds the controlling worker for one origin and swaps in upgrades.
pub struct ServiceWorkerContainer<S: FetchStrategy = DefaultStrategy> {
    /// Origin this container belongs to
    origin: Url,
    /// Controller for the origin (if any)
    controller: RwLock<Option<Arc<ServiceWorker<S>>>>,
}

impl<S: FetchStrategy> ServiceWorkerContainer<S> {
    /// Create a new container
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            controller: RwLock::new(None),
        }
    }

    /// Get the origin
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Current controller
    pub fn controller(&self) -> Option<Arc<ServiceWorker<S>>> {
        self.controller.read().clone()
    }

    /// Install and activate `worker`, then make it the controller.
    ///
    /// If install fails the current controller keeps serving.
    pub async fn update(
        &self,
        worker: ServiceWorker<S>,
    ) -> Result<Arc<ServiceWorker<S>>, ServiceWorkerError> {
        if worker.config().origin.origin() != self.origin.origin() {
            return Err(ServiceWorkerError::OriginMismatch {
                worker: worker.config().origin.to_string(),
                container: self.origin.to_string(),
            });
        }

        worker.install().await?;
        worker.activate().await?;

        let worker = Arc::new(worker);
        let previous = self.controller.write().replace(Arc::clone(&worker));

        if let Some(previous) = previous {
            if let Err(e) = previous.retire() {
                log::warn!("[SW] Could not retire {}: {}", previous.id(), e);
            }
            log::info!(
                "[SW] Controller change: {} ({}) -> {} ({})",
                previous.id(),
                previous.generation(),
                worker.id(),
                worker.generation()
            );
        }

        Ok(worker)
    }

    /// Route a request through the controller, or pass it through.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, FetchError> {
        match self.controller() {
            Some(worker) => worker.handle(request).await,
            None => Ok(FetchOutcome::Passthrough(request)),
        }
    }
}
