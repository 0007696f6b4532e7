//! Request routing: scope filter, classification and the two strategies.
//!
//! ### Strategies
//! - **document** (navigations, HTML accepts): network first; on transport
//!   failure fall back to the cached request, then to the cached app shell.
//! - **asset** (everything else same-origin): cache first; on a miss fetch
//!   and store.
//!
//! Successful network responses are duplicated and written to the current
//! generation in the background. Those writes never affect the response.

use super::{FetchEvent, Worker, WorkerState};
use crate::Error;
use crate::http::{Request, RequestMode, Response, resolve, same_origin};
use crate::manifest::APP_SHELL;

/// Content class of a same-origin request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Top-level page or HTML: freshness first.
    Document,
    /// Everything else: speed first.
    Asset,
}

/// Classify a request from its navigation mode and accept header alone.
pub fn classify(request: &Request) -> RequestClass {
    let accepts_html = request
        .headers()
        .get("accept")
        .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html"));

    if request.mode() == RequestMode::Navigate || accepts_html {
        RequestClass::Document
    } else {
        RequestClass::Asset
    }
}

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not ours: use default network handling.
    Passthrough,
    /// Deliver this outcome to the requester. An error is a failed request.
    Respond(Result<Response, Error>),
}

impl Worker {
    /// Route one intercepted request.
    ///
    /// Only an activated worker participates; cross-origin requests are
    /// never read from or written to the cache.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> FetchDisposition {
        let request = event.request();

        if self.state() != WorkerState::Activated {
            tracing::debug!(worker = %self.id, state = %self.state(), "worker not active, passing through");
            return FetchDisposition::Passthrough;
        }

        if !same_origin(request.url(), &self.origin) {
            return FetchDisposition::Passthrough;
        }

        let class = classify(request);
        tracing::debug!(url = %request.url(), method = request.method(), ?class, "routing request");

        let outcome = match class {
            RequestClass::Document => self.network_first(event).await,
            RequestClass::Asset => self.cache_first(event).await,
        };
        FetchDisposition::Respond(outcome)
    }

    async fn network_first(&self, event: &FetchEvent) -> Result<Response, Error> {
        let request = event.request();

        let network_err = match self.network.fetch(request).await {
            Ok(response) => {
                self.stash(event, response.duplicate());
                return Ok(response);
            }
            Err(e) => e,
        };

        tracing::debug!(url = %request.url(), error = %network_err, "network failed, falling back to cache");

        if let Some(cached) = self.caches.match_request(request).await? {
            return Ok(cached);
        }

        let shell = Request::get(resolve(&self.origin, APP_SHELL)?)?;
        match self.caches.match_request(&shell).await? {
            Some(cached) => {
                tracing::debug!(url = %request.url(), "serving cached app shell");
                Ok(cached)
            }
            None => Err(network_err),
        }
    }

    async fn cache_first(&self, event: &FetchEvent) -> Result<Response, Error> {
        let request = event.request();

        if let Some(cached) = self.caches.match_request(request).await? {
            return Ok(cached);
        }

        let response = self.network.fetch(request).await?;
        self.stash(event, response.duplicate());
        Ok(response)
    }

    /// Write a copy into the current generation without holding up the caller.
    fn stash(&self, event: &FetchEvent, copy: Response) {
        let caches = self.caches.clone();
        let generation = self.cache_name.to_string();
        let request = event.request().clone();

        event.wait_until(async move {
            let stored = async { caches.open(&generation).await?.put(&request, &copy).await }.await;
            if let Err(e) = stored {
                tracing::debug!(url = %request.url(), error = %e, "background cache write dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheDb, CacheStorage};
    use crate::http::Headers;
    use crate::network::testing::StubNetwork;
    use crate::worker::host::testing::RecordingHost;
    use crate::worker::testing::*;

    fn url(path: &str) -> url::Url {
        url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn navigation(path: &str) -> Request {
        Request::get(url(path)).unwrap().with_mode(RequestMode::Navigate)
    }

    fn asset(path: &str) -> Request {
        Request::get(url(path)).unwrap().with_mode(RequestMode::NoCors)
    }

    async fn active(network: Arc<StubNetwork>, manifest: &[&str]) -> (Worker, Arc<CacheDb>) {
        let (worker, db) = worker("v1.0.0", manifest, network).await;
        let host = RecordingHost::default();
        worker.install(&host).await.unwrap();
        worker.activate(&host).await.unwrap();
        (worker, db)
    }

    async fn respond(worker: &Worker, request: Request) -> Result<Response, Error> {
        let event = FetchEvent::new(request);
        let disposition = worker.handle_fetch(&event).await;
        event.lifetime().settled().await;
        match disposition {
            FetchDisposition::Respond(outcome) => outcome,
            FetchDisposition::Passthrough => panic!("expected a response"),
        }
    }

    #[test]
    fn test_classify_navigation() {
        assert_eq!(classify(&navigation("/dashboard")), RequestClass::Document);
    }

    #[test]
    fn test_classify_accept_html() {
        let headers: Headers = [("Accept", "text/html,application/xhtml+xml;q=0.9")].into_iter().collect();
        let request = asset("/partial").with_headers(headers);
        assert_eq!(classify(&request), RequestClass::Document);
    }

    #[test]
    fn test_classify_asset() {
        let headers: Headers = [("accept", "image/avif,image/webp,*/*")].into_iter().collect();
        assert_eq!(classify(&asset("/logo.png").with_headers(headers)), RequestClass::Asset);
        assert_eq!(classify(&asset("/logo.png")), RequestClass::Asset);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let headers: Headers = [("accept", "text/html")].into_iter().collect();
        let a = asset("/a").with_headers(headers.clone());
        let b = asset("/b").with_headers(headers);
        assert_eq!(classify(&a), classify(&b));
        assert_eq!(classify(&a), classify(&a.clone()));
    }

    #[tokio::test]
    async fn test_cross_origin_untouched() {
        let network = shell_network();
        let (worker, db) = active(network.clone(), &["/"]).await;
        let calls_before = network.call_count();
        let entries_before = db.entry_count().await.unwrap();

        let foreign = Request::get(url::Url::parse("https://cdn.example.net/lib.js").unwrap()).unwrap();
        let event = FetchEvent::new(foreign.with_mode(RequestMode::Navigate));
        let disposition = worker.handle_fetch(&event).await;
        event.lifetime().settled().await;

        assert!(matches!(disposition, FetchDisposition::Passthrough));
        assert_eq!(network.call_count(), calls_before);
        assert_eq!(db.entry_count().await.unwrap(), entries_before);
    }

    #[tokio::test]
    async fn test_inactive_worker_passes_through() {
        let (worker, _) = worker("v1", &["/"], shell_network()).await;
        let event = FetchEvent::new(navigation("/"));
        assert!(matches!(worker.handle_fetch(&event).await, FetchDisposition::Passthrough));
    }

    #[tokio::test]
    async fn test_cached_asset_skips_network() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/", "/assets/favicon.ico"]).await;
        let calls_before = network.call_count();

        let response = respond(&worker, asset("/assets/favicon.ico")).await.unwrap();

        assert_eq!(&response.body[..], b"ico-bytes");
        assert_eq!(network.call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_asset_miss_fetches_then_caches() {
        let network = shell_network();
        network.route("https://app.example.com/assets/logo-96.png", 200, "logo", "image/png");
        let (worker, db) = active(network.clone(), &["/"]).await;

        let first = respond(&worker, asset("/assets/logo-96.png")).await.unwrap();
        assert_eq!(&first.body[..], b"logo");
        let calls_after_first = network.call_count();

        let second = respond(&worker, asset("/assets/logo-96.png")).await.unwrap();
        assert_eq!(&second.body[..], b"logo");
        assert_eq!(network.call_count(), calls_after_first);
        assert!(
            db.entries("cache-v1.0.0")
                .await
                .unwrap()
                .contains(&"https://app.example.com/assets/logo-96.png".to_string())
        );
    }

    #[tokio::test]
    async fn test_asset_miss_offline_fails() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/"]).await;
        network.set_offline(true);

        let result = respond(&worker, asset("/assets/unknown.png")).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_document_prefers_network() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/"]).await;
        network.route("https://app.example.com/", 200, "<html>fresh</html>", "text/html");
        let calls_before = network.call_count();

        let response = respond(&worker, navigation("/")).await.unwrap();

        assert_eq!(&response.body[..], b"<html>fresh</html>");
        assert_eq!(network.call_count(), calls_before + 1);
    }

    #[tokio::test]
    async fn test_document_refreshes_cache() {
        let network = shell_network();
        let (worker, db) = active(network.clone(), &["/"]).await;
        network.route("https://app.example.com/", 200, "<html>fresh</html>", "text/html");

        respond(&worker, navigation("/")).await.unwrap();

        let stored = db.match_in("cache-v1.0.0", &navigation("/")).await.unwrap().unwrap();
        assert_eq!(&stored.body[..], b"<html>fresh</html>");
    }

    #[tokio::test]
    async fn test_document_error_status_is_not_failure() {
        let network = shell_network();
        network.route("https://app.example.com/gone", 404, "not here", "text/html");
        let (worker, db) = active(network.clone(), &["/"]).await;

        let response = respond(&worker, navigation("/gone")).await.unwrap();

        assert_eq!(response.status, 404);
        let stored = db.match_in("cache-v1.0.0", &navigation("/gone")).await.unwrap();
        assert_eq!(stored.map(|r| r.status), Some(404));
    }

    #[tokio::test]
    async fn test_offline_document_uses_exact_match() {
        let network = shell_network();
        network.route("https://app.example.com/reports", 200, "<html>reports</html>", "text/html");
        let (worker, _) = active(network.clone(), &["/", "/reports"]).await;
        network.set_offline(true);

        let response = respond(&worker, navigation("/reports")).await.unwrap();
        assert_eq!(&response.body[..], b"<html>reports</html>");
    }

    #[tokio::test]
    async fn test_offline_document_falls_back_to_shell() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/"]).await;
        network.set_offline(true);

        let response = respond(&worker, navigation("/settings")).await.unwrap();
        assert_eq!(&response.body[..], b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_offline_document_without_shell_fails() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/assets/favicon.ico"]).await;
        network.set_offline(true);

        let result = respond(&worker, navigation("/settings")).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_network_first_reads_cache_only_after_failure() {
        let network = shell_network();
        let (worker, _) = active(network.clone(), &["/"]).await;
        network.set_offline(true);
        let calls_before = network.call_count();

        respond(&worker, navigation("/")).await.unwrap();

        let calls = network.calls();
        assert_eq!(calls.len(), calls_before + 1);
        assert_eq!(calls.last().map(String::as_str), Some("https://app.example.com/"));
    }

    #[tokio::test]
    async fn test_non_get_document_write_is_swallowed() {
        let network = shell_network();
        let (worker, db) = active(network.clone(), &["/"]).await;
        network.route("https://app.example.com/submit", 200, "<html>thanks</html>", "text/html");
        let entries_before = db.entry_count().await.unwrap();

        let post = Request::new("POST", url("/submit")).unwrap().with_mode(RequestMode::Navigate);
        let response = respond(&worker, post).await.unwrap();

        assert_eq!(&response.body[..], b"<html>thanks</html>");
        assert_eq!(db.entry_count().await.unwrap(), entries_before);
    }

    #[tokio::test]
    async fn test_background_write_failure_never_reaches_caller() {
        let network = shell_network();
        network.route("https://app.example.com/assets/late.png", 200, "late", "image/png");
        let (worker, db) = active(network.clone(), &["/"]).await;

        let event = FetchEvent::new(asset("/assets/late.png"));
        let disposition = worker.handle_fetch(&event).await;
        db.conn.call(|conn| conn.execute_batch("DROP TABLE entries")).await.unwrap();
        event.lifetime().settled().await;

        match disposition {
            FetchDisposition::Respond(Ok(response)) => assert_eq!(&response.body[..], b"late"),
            other => panic!("unexpected disposition: {other:?}"),
        }
    }
}
