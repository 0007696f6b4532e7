//! Request and response snapshots exchanged between the host, the cache
//! store and the network.
//!
//! A [`Response`] models a single-use body: it is not `Clone`, and the only
//! way to hand the same response to two consumers (the caller and the cache)
//! is the explicit [`Response::duplicate`] step.

pub mod url;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use self::url::{UrlError, canonicalize, resolve, same_origin};

/// Headers that describe a single connection and never survive a hop.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header name is connection-scoped.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// How the requester intends to use the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` style token. Unknown tokens map to `NoCors`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "cors" => RequestMode::Cors,
            _ => RequestMode::NoCors,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Navigate => "navigate",
            RequestMode::SameOrigin => "same-origin",
            RequestMode::NoCors => "no-cors",
            RequestMode::Cors => "cors",
        }
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    url: ::url::Url,
    mode: RequestMode,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Build a request. The method is uppercased and the URL normalized.
    pub fn new(method: &str, url: ::url::Url) -> Result<Self, crate::Error> {
        let method = method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(crate::Error::InvalidInput("request method cannot be empty".into()));
        }
        let url = canonicalize(url.as_str())?;
        Ok(Self { method, url, mode: RequestMode::default(), headers: Headers::new(), body: Bytes::new() })
    }

    /// A plain GET, as issued for manifest entries and the app shell.
    pub fn get(url: ::url::Url) -> Result<Self, crate::Error> {
        Self::new("GET", url)
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &::url::Url {
        &self.url
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response snapshot: status, headers and a fully buffered body.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    /// Final URL after redirects, when known.
    pub url: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into(), url: None }
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Snapshot this response so it can be consumed twice.
    ///
    /// The body buffer is reference counted, so the copy shares storage.
    pub fn duplicate(&self) -> Response {
        Response { status: self.status, headers: self.headers.clone(), body: self.body.clone(), url: self.url.clone() }
    }
}
