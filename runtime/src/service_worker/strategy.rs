//! Caching Strategies
//!
//! The two freshness policies a worker can be built with. The strategy is a
//! type parameter of [`ServiceWorker`](super::ServiceWorker), so it is fixed
//! at compile time; the `network-first` crate feature flips
//! [`DefaultStrategy`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cache::CacheStore;
use super::fetch::{FetchError, FetchResponse, Request, RequestKey, Response, ResponseType};
use super::network::Network;

/// Which network responses may be stored opportunistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Also store CORS responses from other origins.
    #[serde(default)]
    pub cache_cross_origin: bool,
}

impl CachePolicy {
    /// Whether `response` may be written to the current generation.
    pub fn is_cacheable(&self, response: &Response) -> bool {
        if response.status != 200 {
            return false;
        }
        match response.response_type {
            ResponseType::Basic => true,
            ResponseType::Cors => self.cache_cross_origin,
            ResponseType::Opaque | ResponseType::Error => false,
        }
    }
}

/// Everything a strategy needs to answer one request.
///
/// Built per request from the worker, so it always names the generation
/// the worker is serving at that moment.
pub struct FetchContext {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    generation: String,
    policy: CachePolicy,
}

impl FetchContext {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        generation: impl Into<String>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            network,
            generation: generation.into(),
            policy,
        }
    }

    /// Generation tag this context reads and writes
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Look up `request` in the current generation. Store failures count as
    /// a miss.
    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self
            .store
            .match_request(&self.generation, &request.key())
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!(
                    "[SW] Cache lookup failed in {} for {}: {}",
                    self.generation,
                    request.url,
                    e
                );
                None
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.network
            .fetch(request)
            .await
            .map_err(|source| FetchError::Network {
                url: request.url.to_string(),
                source,
            })
    }

    /// Write `response` under `key` in the background.
    ///
    /// The write runs as its own task, so it completes even if the caller
    /// drops the request future, and the caller never waits on it. It only
    /// lands while the generation still exists; a superseded worker's late
    /// fill is dropped instead of recreating a swept generation.
    fn persist(&self, key: RequestKey, response: Response) {
        let store = Arc::clone(&self.store);
        let generation = self.generation.clone();
        tokio::spawn(async move {
            match store.put_existing(&generation, key.clone(), response).await {
                Ok(true) => log::debug!("[SW] Cached {} in {}", key, generation),
                Ok(false) => log::debug!(
                    "[SW] Dropped fill of {}: generation {} is gone",
                    key,
                    generation
                ),
                Err(e) => log::warn!("[SW] Failed to cache {} in {}: {}", key, generation, e),
            }
        });
    }
}

/// A freshness policy for intercepted `GET` requests.
#[async_trait]
pub trait FetchStrategy: Default + Send + Sync + 'static {
    /// Short name used in logs
    const NAME: &'static str;

    /// Produce a response for `request`.
    async fn respond(
        &self,
        ctx: &FetchContext,
        request: &Request,
    ) -> Result<FetchResponse, FetchError>;
}

/// Serve from the current generation; on a miss fetch and store the result.
///
/// Hits are returned without any revalidation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheFirst;

#[async_trait]
impl FetchStrategy for CacheFirst {
    const NAME: &'static str = "cache-first";

    async fn respond(
        &self,
        ctx: &FetchContext,
        request: &Request,
    ) -> Result<FetchResponse, FetchError> {
        if let Some(cached) = ctx.lookup(request).await {
            log::debug!("[SW] Cache hit: {}", request.url);
            return Ok(FetchResponse::from_cache(cached));
        }

        log::debug!("[SW] Cache miss, fetching: {}", request.url);
        let response = ctx.fetch(request).await?;

        if ctx.policy.is_cacheable(&response) {
            ctx.persist(request.key(), response.clone());
        }

        Ok(FetchResponse::from_network(response))
    }
}

/// Always try the network; fall back to the current generation offline.
///
/// Network responses are never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkFirst;

#[async_trait]
impl FetchStrategy for NetworkFirst {
    const NAME: &'static str = "network-first";

    async fn respond(
        &self,
        ctx: &FetchContext,
        request: &Request,
    ) -> Result<FetchResponse, FetchError> {
        match ctx.fetch(request).await {
            Ok(response) => Ok(FetchResponse::from_network(response)),
            Err(e) => {
                log::debug!("[SW] {}; falling back to cache", e);
                ctx.lookup(request)
                    .await
                    .map(FetchResponse::from_cache)
                    .ok_or_else(|| FetchError::NotAvailable {
                        url: request.url.to_string(),
                    })
            }
        }
    }
}

/// Strategy used by [`DefaultServiceWorker`](super::DefaultServiceWorker).
#[cfg(not(feature = "network-first"))]
pub type DefaultStrategy = CacheFirst;

/// Strategy used by [`DefaultServiceWorker`](super::DefaultServiceWorker).
#[cfg(feature = "network-first")]
pub type DefaultStrategy = NetworkFirst;
