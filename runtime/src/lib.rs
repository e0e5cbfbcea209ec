//! Vehicle Care PWA Service Worker Runtime
//!
//! Offline cache worker for the Vehicle Care web app. The worker pre-caches a
//! fixed manifest into a versioned cache generation on install, drops every
//! other generation on activation, and answers `GET` requests from the cache
//! or the network according to a strategy chosen at build time.
//!
//! # Architecture
//!
//! - `service_worker::fetch`: Request/response model and fetch outcomes
//! - `service_worker::cache`: Generation-partitioned cache store + in-memory backend
//! - `service_worker::network`: Live fetch seam + route-table network
//! - `service_worker::strategy`: Cache-first / network-first freshness policies
//! - `service_worker::lifecycle`: Install/activate state machine and events
//! - `service_worker::config`: Version tag, manifest set and policy knobs (TOML)
//!
//! Store and network are trait objects supplied by the host. Operations are
//! `async` and must be driven inside a Tokio runtime.

pub mod service_worker;

pub use service_worker::{
    CacheFirst, CacheStore, DefaultServiceWorker, FetchOutcome, MemoryCacheStorage, Network,
    NetworkFirst, Request, Response, ServiceWorker, ServiceWorkerContainer, ServiceWorkerError,
    WorkerConfig,
};
