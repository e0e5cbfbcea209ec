//! Shared fixtures for the property tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pwa_sw_runtime::service_worker::{
    CacheError, CacheStore, FetchStrategy, MemoryCacheStorage, RequestKey, Response,
    ServiceWorker, StaticNetwork, WorkerConfig,
};
use url::Url;

pub const ORIGIN: &str = "https://vehicle-care.example";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

/// Store wrapper that counts every call made through the trait.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryCacheStorage,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn touches(&self) -> usize {
        self.reads() + self.writes()
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn open(&self, tag: &str) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.open(tag).await
    }

    async fn match_request(
        &self,
        tag: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.match_request(tag, key).await
    }

    async fn put(&self, tag: &str, key: RequestKey, response: Response) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(tag, key, response).await
    }

    async fn put_existing(
        &self,
        tag: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_existing(tag, key, response).await
    }

    async fn put_all(
        &self,
        tag: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_all(tag, entries).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.keys().await
    }

    async fn delete(&self, tag: &str) -> Result<bool, CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(tag).await
    }
}

/// Network serving the app shell.
pub fn shell_network() -> Arc<StaticNetwork> {
    let net = StaticNetwork::new(origin());
    net.serve("/", b"<!doctype html><title>Vehicle Care</title>")
        .unwrap();
    net.serve("/index.html", b"<!doctype html><title>Vehicle Care</title>")
        .unwrap();
    Arc::new(net)
}

/// Build a worker for `version` with the shell manifest.
pub fn shell_worker<S: FetchStrategy>(
    version: &str,
    store: Arc<dyn CacheStore>,
    net: Arc<StaticNetwork>,
) -> ServiceWorker<S> {
    let config = WorkerConfig::new(version, origin()).with_manifest(["/", "/index.html"]);
    ServiceWorker::new(config, store, net).unwrap()
}

/// Build, install and activate a shell worker.
pub async fn active_worker<S: FetchStrategy>(
    version: &str,
    store: Arc<dyn CacheStore>,
    net: Arc<StaticNetwork>,
) -> ServiceWorker<S> {
    let worker = shell_worker(version, store, net);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    worker
}

/// Let spawned cache fills run. Only meaningful on a current-thread runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Single-threaded runtime for driving async code from proptest bodies.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}
