//! Worker configuration.
//!
//! The version tag names the cache generation the worker owns; bumping it
//! is what invalidates every previously stored artifact. Loaded from TOML:
//!
//! ```toml
//! version = "vehicle-care-pwa-cache-v2"
//! origin = "https://vehicle-care.example"
//! manifest = ["/", "index.html", "manifest.json"]
//!
//! [policy]
//! cache_cross_origin = false
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use super::fetch::Request;
use super::strategy::CachePolicy;

/// Generation tag shipped with the app
pub const DEFAULT_VERSION: &str = "vehicle-care-pwa-cache-v1";

/// Origin the app is served from
pub const DEFAULT_ORIGIN: &str = "https://vehicle-care.example";

/// Resources pre-cached on install. Styles and scripts are inlined in
/// `index.html`.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "index.html",
    "manifest.json",
    "icons/icon-192x192.png",
    "icons/icon-512x512.png",
];

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("version tag must not be empty")]
    EmptyVersion,

    #[error("origin must be an absolute http(s) URL: {0}")]
    InvalidOrigin(String),

    #[error("manifest entry {entry:?}: {reason}")]
    InvalidManifestEntry { entry: String, reason: String },
}

/// Service worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Cache generation tag
    pub version: String,
    /// Origin the worker controls; manifest paths resolve against it
    pub origin: Url,
    /// Seed set fetched on install
    #[serde(default)]
    pub manifest: Vec<String>,
    /// Opportunistic caching rules
    #[serde(default)]
    pub policy: CachePolicy,
}

impl WorkerConfig {
    /// Create a config with an empty manifest
    pub fn new(version: impl Into<String>, origin: Url) -> Self {
        Self {
            version: version.into(),
            origin,
            manifest: Vec::new(),
            policy: CachePolicy::default(),
        }
    }

    /// Replace the manifest set
    pub fn with_manifest<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the caching policy
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parse and validate a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the version tag, the origin and every manifest entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
            return Err(ConfigError::InvalidOrigin(self.origin.to_string()));
        }
        self.manifest_requests().map(|_| ())
    }

    /// Resolve the manifest set into `GET` requests, dropping entries that
    /// resolve to the same URL.
    pub fn manifest_requests(&self) -> Result<Vec<Request>, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut requests = Vec::with_capacity(self.manifest.len());

        for entry in &self.manifest {
            let url = self.resolve(entry)?;
            if seen.insert(url.as_str().to_string()) {
                requests.push(Request::new(url));
            }
        }

        Ok(requests)
    }

    fn resolve(&self, entry: &str) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidManifestEntry {
            entry: entry.to_string(),
            reason,
        };

        let url = self.origin.join(entry).map_err(|e| invalid(e.to_string()))?;
        if url.origin() != self.origin.origin() {
            return Err(invalid(format!("resolves outside {}", self.origin)));
        }
        Ok(url)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            policy: CachePolicy::default(),
        }
    }
}
