//! Structured errors for the shellcache proxy.
//!
//! Every failed request surfaces to the caller as a bare status with an
//! empty body; the cause only goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Why a proxied request could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The incoming request could not be turned into a cacheable request.
    #[error("INVALID_INPUT: {0}")]
    InvalidRequest(String),

    /// The lifecycle controller or the network failed the request.
    #[error(transparent)]
    Failed(#[from] shellcache_core::Error),

    /// The upstream response could not be written back.
    #[error("BAD_RESPONSE: {0}")]
    BadResponse(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Failed(_) | ProxyError::BadResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        status.into_response()
    }
}
