//! Network fetch seam.

use async_trait::async_trait;

use crate::Error;
use crate::http::{Request, Response};

/// Performs a request against the network.
///
/// Any HTTP status, including 4xx and 5xx, is a successful fetch. Only
/// transport failures are errors.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, Error>;
}
