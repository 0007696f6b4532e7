//! HTTP network access for the lifecycle controller.
//!
//! ### Semantics
//! - Any HTTP status is a successful fetch; only transport failures error
//! - Redirects are followed (max 5) and the final URL is reported, except
//!   for navigations: those get the 3xx itself so the browser follows it and
//!   its address bar matches the page
//! - Hop-by-hop headers are dropped in both directions
//! - Max body bytes: 5MB (configurable)
//!
//! The timeout lives here rather than in the controller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};

use shellcache_core::http::{Headers, Request, RequestMode, Response, is_hop_by_hop};
use shellcache_core::{AppConfig, Error, Fetch};

/// Request headers the client computes itself.
const CLIENT_MANAGED: &[&str] = &["host", "content-length"];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shellcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "shellcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Self::default()
        }
    }
}

/// reqwest-backed [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    /// Same settings as `http` but never follows redirects.
    navigation: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = build_client(&config, Policy::limited(config.max_redirects))?;
        let navigation = build_client(&config, Policy::none())?;

        Ok(Self { http, navigation, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn too_large(&self, len: usize) -> Error {
        Error::FetchTooLarge(format!("{len} bytes exceeds {}", self.config.max_bytes))
    }
}

fn build_client(config: &FetchConfig, redirects: Policy) -> Result<Client, Error> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .redirect(redirects)
        .use_rustls_tls()
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))
}

fn forwardable(name: &str) -> bool {
    !is_hop_by_hop(name) && !CLIENT_MANAGED.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn transport_error(url: &url::Url, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Network(format!("timeout fetching {url}"))
    } else {
        Error::Network(format!("{url}: {err}"))
    }
}

#[async_trait]
impl Fetch for FetchClient {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let url = request.url();

        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("unsupported method: {}", request.method())))?;

        if request.body().len() > self.config.max_bytes {
            return Err(self.too_large(request.body().len()));
        }

        let http = match request.mode() {
            RequestMode::Navigate => &self.navigation,
            _ => &self.http,
        };

        let mut builder = http.request(method, url.clone());
        for (name, value) in request.headers().iter().filter(|(name, _)| forwardable(name)) {
            builder = builder.header(name, value);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await.map_err(|e| transport_error(url, e))?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len as usize));
        }

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: Headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();

        let body = response.bytes().await.map_err(|e| transport_error(url, e))?;

        if body.len() > self.config.max_bytes {
            return Err(self.too_large(body.len()));
        }

        tracing::debug!(
            method = request.method(),
            url = %url,
            status,
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "network fetch"
        );

        let mut response = Response::new(status, headers, body);
        response.url = Some(final_url);
        Ok(response)
    }
}
