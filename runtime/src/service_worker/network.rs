//! Network Access
//!
//! The worker never talks to sockets itself; the host hands it a [`Network`]
//! that performs a live fetch for a request identity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use spin::RwLock;
use url::Url;

use super::fetch::{Request, Response, ResponseType};

/// Live fetch failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network is offline")]
    Offline,

    #[error("request failed: {0}")]
    Failed(String),
}

/// Fetch-by-identity primitive supplied by the host.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a live fetch. The returned body is fully buffered.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Route-table network.
///
/// Serves registered responses, answers unknown URLs with `404`, and can be
/// switched offline. Responses are classified `Basic` when the request URL
/// shares the configured origin and `Cors` otherwise, unless a route was
/// registered with an explicit non-basic type.
pub struct StaticNetwork {
    /// Origin used to classify responses
    origin: Url,
    /// URL -> response
    routes: RwLock<BTreeMap<String, Response>>,
    /// URLs that fail at the transport level
    failing: RwLock<BTreeSet<String>>,
    /// Connectivity switch
    online: AtomicBool,
    /// Number of fetches attempted
    calls: AtomicUsize,
}

impl StaticNetwork {
    /// Create an online network with no routes
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: RwLock::new(BTreeMap::new()),
            failing: RwLock::new(BTreeSet::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serve `response` for `url`. Relative URLs resolve against the origin.
    pub fn route(&self, url: &str, response: Response) -> Result<(), url::ParseError> {
        let url = self.origin.join(url)?;
        self.routes.write().insert(url.into(), response);
        Ok(())
    }

    /// Serve a `200` with `body` for `url`.
    pub fn serve(&self, url: &str, body: &'static [u8]) -> Result<(), url::ParseError> {
        self.route(url, Response::new(200).with_body(body))
    }

    /// Make fetches of `url` fail at the transport level.
    pub fn fail(&self, url: &str) -> Result<(), url::ParseError> {
        let url = self.origin.join(url)?;
        self.failing.write().insert(url.into());
        Ok(())
    }

    /// Toggle connectivity
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether fetches currently reach the route table
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn classify(&self, request: &Request, mut response: Response) -> Response {
        if response.response_type == ResponseType::Basic
            && request.url.origin() != self.origin.origin()
        {
            response.response_type = ResponseType::Cors;
        }
        if response.url.is_none() {
            response.url = Some(request.url.clone());
        }
        response
    }
}

#[async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_online() {
            return Err(NetworkError::Offline);
        }

        let url = request.url.as_str();
        if self.failing.read().contains(url) {
            return Err(NetworkError::Failed(format!("connection reset: {url}")));
        }

        let response = self
            .routes
            .read()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Response::new(404));

        Ok(self.classify(request, response))
    }
}
