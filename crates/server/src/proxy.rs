//! HTTP front door: turns incoming requests into dispatches.
//!
//! ### Request mapping
//! - Targets resolve against the configured origin; an absolute-form or
//!   `//host` target for any other origin is a bad request
//! - `Sec-Fetch-Mode` sets the request mode
//! - `x-shellcache-client` names the client, else the peer IP does
//! - Hop-by-hop headers are dropped in both directions

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use shellcache_core::http::{Headers, Request, RequestMode, is_hop_by_hop, resolve};

use crate::clients::ClientId;
use crate::error::ProxyError;
use crate::registration::Registration;

/// Header a client may send to identify itself across connections.
pub const CLIENT_HEADER: &str = "x-shellcache-client";

/// Headers that describe the hop to the agent rather than the request.
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "content-length", CLIENT_HEADER];

#[derive(Clone)]
struct ProxyState {
    registration: Arc<Registration>,
    origin: url::Url,
}

/// Build the proxy router. Every path is handled by the fallback.
pub fn router(registration: Arc<Registration>) -> Result<Router, shellcache_core::Error> {
    let origin = shellcache_core::http::canonicalize(&registration.config().origin)?;
    let state = ProxyState { registration, origin };
    Ok(Router::new().fallback(proxy).with_state(state))
}

async fn proxy(
    State(state): State<ProxyState>, ConnectInfo(peer): ConnectInfo<SocketAddr>, request: axum::extract::Request,
) -> Result<Response, ProxyError> {
    let max_bytes = state.registration.config().max_bytes;
    let (parts, body) = request.into_parts();

    let client = client_id(&parts.headers, peer);
    let body = axum::body::to_bytes(body, max_bytes)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("unreadable body: {e}")))?;
    let request = to_request(&state.origin, parts.method.as_str(), &parts.uri, &parts.headers)?.with_body(body);

    tracing::debug!(client = %client, method = request.method(), url = %request.url(), "dispatching");

    let dispatched = state.registration.dispatch(&client, request).await;

    if dispatched.lifetime.pending() > 0 {
        let lifetime = dispatched.lifetime.clone();
        tokio::spawn(async move { lifetime.settled().await });
    }

    to_response(dispatched.response?)
}

fn client_id(headers: &HeaderMap, peer: SocketAddr) -> ClientId {
    headers
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| ClientId(v.to_string()))
        .unwrap_or_else(|| ClientId(peer.ip().to_string()))
}

fn to_request(origin: &url::Url, method: &str, uri: &Uri, headers: &HeaderMap) -> Result<Request, ProxyError> {
    let target = match uri.scheme() {
        Some(_) => resolve(origin, &uri.to_string()),
        None => resolve(origin, uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")),
    }
    .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let mode = headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
        .map(RequestMode::from_token)
        .unwrap_or_default();

    let forwarded: Headers = headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name.as_str()) && !SKIPPED_REQUEST_HEADERS.contains(&name.as_str())
        })
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();

    Ok(Request::new(method, target)?.with_mode(mode).with_headers(forwarded))
}

fn to_response(response: shellcache_core::Response) -> Result<Response, ProxyError> {
    let status = StatusCode::from_u16(response.status)
        .map_err(|_| ProxyError::BadResponse(format!("invalid status {}", response.status)))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers.iter() {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(response.body))
        .map_err(|e| ProxyError::BadResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;
    use wiremock::MockServer;

    use super::*;
    use crate::registration::testing::*;

    const PEER: ([u8; 4], u16) = ([10, 0, 0, 7], 50000);

    fn app(registration: Arc<Registration>) -> Router {
        router(registration).unwrap().layer(MockConnectInfo(SocketAddr::from(PEER)))
    }

    async fn send(app: Router, request: HttpRequest<Body>) -> (StatusCode, HeaderMap, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    fn navigation(path: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(path)
            .header("sec-fetch-mode", "navigate")
            .header("accept", "text/html")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_client_id_prefers_header() {
        let mut headers = HeaderMap::new();
        let peer = SocketAddr::from(PEER);
        assert_eq!(client_id(&headers, peer), ClientId("10.0.0.7".into()));

        headers.insert(CLIENT_HEADER, "tab-42".parse().unwrap());
        assert_eq!(client_id(&headers, peer), ClientId("tab-42".into()));
    }

    #[test]
    fn test_to_request_maps_mode_and_headers() {
        let origin = url::Url::parse("https://app.example.com").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", "navigate".parse().unwrap());
        headers.insert("accept", "text/html".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert(CLIENT_HEADER, "tab".parse().unwrap());
        let uri: Uri = "/reports?page=2".parse().unwrap();

        let request = to_request(&origin, "GET", &uri, &headers).unwrap();

        assert_eq!(request.url().as_str(), "https://app.example.com/reports?page=2");
        assert_eq!(request.mode(), RequestMode::Navigate);
        assert_eq!(request.headers().get("accept"), Some("text/html"));
        assert!(request.headers().get("connection").is_none());
        assert!(request.headers().get(CLIENT_HEADER).is_none());
    }

    #[test]
    fn test_to_request_accepts_absolute_same_origin() {
        let origin = url::Url::parse("https://app.example.com").unwrap();
        let uri: Uri = "https://app.example.com/app.js".parse().unwrap();

        let request = to_request(&origin, "GET", &uri, &HeaderMap::new()).unwrap();

        assert_eq!(request.url().as_str(), "https://app.example.com/app.js");
        assert_eq!(request.mode(), RequestMode::NoCors);
    }

    #[test]
    fn test_to_request_rejects_foreign_targets() {
        let origin = url::Url::parse("https://app.example.com").unwrap();

        for target in ["http://cdn.example.net/lib.js", "http://app.example.com/app.js", "//internal-host/secret"] {
            let uri: Uri = target.parse().unwrap();
            let result = to_request(&origin, "GET", &uri, &HeaderMap::new());
            assert!(matches!(result, Err(ProxyError::InvalidRequest(_))), "{target} was accepted");
        }
    }

    #[test]
    fn test_to_response_drops_hop_by_hop() {
        let headers: Headers =
            [("content-type", "text/css"), ("transfer-encoding", "chunked"), ("content-length", "99")]
                .into_iter()
                .collect();
        let response = to_response(shellcache_core::Response::new(200, headers, "a{}")).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/css");
        assert!(response.headers().get("transfer-encoding").is_none());
    }

    #[tokio::test]
    async fn test_proxy_serves_network_before_install() {
        let server = MockServer::start().await;
        mount_app(&server, 1).await;
        let (registration, _) = registration(&server, "v1").await;

        let (status, _, body) = send(app(Arc::new(registration)), navigation("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_proxy_offline_navigation_serves_shell() {
        let server = MockServer::start().await;
        mount_app(&server, 1).await;
        let (registration, _) = registration(&server, "v1").await;
        registration.register_current().await.unwrap();
        mount_unresponsive(&server).await;

        let (status, headers, body) = send(app(Arc::new(registration)), navigation("/dashboard")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "text/html");
        assert_eq!(body, "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_proxy_refuses_other_origins() {
        let server = MockServer::start().await;
        let (registration, _) = registration(&server, "v1").await;
        let app = app(Arc::new(registration));

        for target in ["http://other-host/secret", "//other-host/secret"] {
            let request = HttpRequest::builder().uri(target).body(Body::empty()).unwrap();
            let (status, _, body) = send(app.clone(), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{target}");
            assert!(body.is_empty());
        }

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        mount_app(&server, 1).await;
        let (registration, _) = registration(&server, "v1").await;
        registration.register_current().await.unwrap();
        mount_unresponsive(&server).await;

        let request = HttpRequest::builder().uri("/uncached.png").body(Body::empty()).unwrap();
        let app = app(Arc::new(registration));
        app.clone().oneshot(navigation("/")).await.unwrap();
        let (status, _, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.is_empty());
    }
}
