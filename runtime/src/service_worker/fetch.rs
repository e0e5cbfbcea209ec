//! Fetch Event Handling
//!
//! Request/response model seen by the worker's fetch handler, plus the
//! outcome type handed back to the host.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use url::Url;

use super::network::NetworkError;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl RequestMethod {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether the worker intercepts requests with this method.
    ///
    /// Only `GET` is handled; everything else goes straight to the host.
    pub fn is_intercepted(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity under which an artifact is stored: method + absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    method: RequestMethod,
    url: String,
}

impl RequestKey {
    /// Build a key for `method url`.
    pub fn new(method: RequestMethod, url: &Url) -> Self {
        Self {
            method,
            url: url.as_str().to_string(),
        }
    }

    /// Method half of the key
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// URL half of the key
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Fetch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute request URL
    pub url: Url,
    /// HTTP method
    pub method: RequestMethod,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request body (if any)
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a new `GET` request
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: RequestMethod::Get,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Parse `url` and create a `GET` request for it
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Replace the method
    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Store identity of this request
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.method, &self.url)
    }
}

/// Response type, as the host classifies it relative to the worker origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response
    #[default]
    Basic,
    /// Cross-origin response readable via CORS
    Cors,
    /// Host-generated network error
    Error,
    /// Cross-origin response with hidden status and body
    Opaque,
}

/// Fetch response.
///
/// The body is read once into an owned buffer; cloning a response hands out
/// another view of the same bytes, so the caller and the store writer can
/// consume it independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response type
    pub response_type: ResponseType,
    /// Final URL
    pub url: Option<Url>,
    /// Status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Bytes,
}

impl Response {
    /// Create a new same-origin response with an empty body
    pub fn new(status: u16) -> Self {
        Self {
            response_type: ResponseType::Basic,
            url: None,
            status,
            status_text: status_text_for(status).to_string(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create an opaque response (status and body hidden)
    pub fn opaque() -> Self {
        Self {
            response_type: ResponseType::Opaque,
            url: None,
            status: 0,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the `Content-Type` header
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.headers
            .insert("Content-Type".to_string(), content_type.to_string());
        self
    }

    /// Set the response type
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Check if response is OK
    pub fn ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Content type marker, if any
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    /// Payload size in bytes
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Get status text for status code
fn status_text_for(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Indicates where a fetch response originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// From the current cache generation.
    Cache,
    /// From the network.
    Network,
}

/// A response produced by the worker together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub response: Response,
    pub source: FetchSource,
}

impl FetchResponse {
    pub(crate) fn from_cache(response: Response) -> Self {
        Self {
            response,
            source: FetchSource::Cache,
        }
    }

    pub(crate) fn from_network(response: Response) -> Self {
        Self {
            response,
            source: FetchSource::Network,
        }
    }
}

/// Result of offering a request to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The worker answered the request.
    Responded(FetchResponse),
    /// Not intercepted; the host performs its default network handling
    /// with the request exactly as it was offered.
    Passthrough(Request),
}

impl FetchOutcome {
    /// The response, if the worker answered.
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            Self::Responded(response) => Some(response),
            Self::Passthrough(_) => None,
        }
    }

    /// Whether the worker left the request to the host.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough(_))
    }
}

/// Terminal failure of a single intercepted request.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("network fetch failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("{url} is neither reachable nor cached")]
    NotAvailable { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_creation() {
        let req = Request::get("https://example.com/page").unwrap();
        assert_eq!(req.url.as_str(), "https://example.com/page");
        assert_eq!(req.method, RequestMethod::Get);
        assert!(req.body.is_none());
    }

    #[test]
    fn test_only_get_is_intercepted() {
        assert!(RequestMethod::Get.is_intercepted());
        for method in [
            RequestMethod::Post,
            RequestMethod::Put,
            RequestMethod::Delete,
            RequestMethod::Patch,
            RequestMethod::Head,
            RequestMethod::Options,
        ] {
            assert!(!method.is_intercepted(), "{method} must pass through");
        }
    }

    #[test]
    fn test_request_key_includes_method() {
        let get = Request::new(url("https://example.com/a"));
        let post = get.clone().with_method(RequestMethod::Post);
        assert_ne!(get.key(), post.key());
        assert_eq!(get.key().to_string(), "GET https://example.com/a");
    }

    #[test]
    fn test_response_ok_range() {
        assert!(Response::new(200).ok());
        assert!(Response::new(204).ok());
        assert!(!Response::new(304).ok());
        assert!(!Response::new(404).ok());
        assert!(!Response::opaque().ok());
    }

    #[test]
    fn test_response_status_text() {
        assert_eq!(Response::new(200).status_text, "OK");
        assert_eq!(Response::new(404).status_text, "Not Found");
        assert_eq!(Response::new(299).status_text, "Unknown");
    }

    #[test]
    fn test_content_type_lookup_is_case_insensitive() {
        let mut resp = Response::new(200);
        resp.headers
            .insert("content-type".to_string(), "text/html".to_string());
        assert_eq!(resp.content_type(), Some("text/html"));
        assert_eq!(Response::new(200).content_type(), None);
    }

    #[test]
    fn test_cloned_response_shares_body() {
        let resp = Response::new(200).with_body(vec![1u8, 2, 3]);
        let copy = resp.clone();
        assert_eq!(resp.body.as_ptr(), copy.body.as_ptr());
        assert_eq!(copy.body_len(), 3);
    }

    #[test]
    fn test_outcome_accessors() {
        let req = Request::get("https://example.com/").unwrap();
        let pass = FetchOutcome::Passthrough(req);
        assert!(pass.is_passthrough());
        assert!(pass.response().is_none());

        let hit = FetchOutcome::Responded(FetchResponse::from_cache(Response::new(200)));
        assert_eq!(hit.response().unwrap().source, FetchSource::Cache);
    }
}
