//! Persistent cache store partitioned into named generations.
//!
//! [`CacheStorage`] is the seam to the backing store; [`CacheDb`] implements it
//! on SQLite via tokio-rusqlite. Callers go through [`Caches`] (storage-wide
//! operations) and the [`Cache`] handle it opens (one generation).
//!
//! - Only GET requests are stored or matched
//! - Keys are SHA-256 of method and canonical URL (fragments dropped)
//! - Writes overwrite; entries die with their generation

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;

pub use crate::Error;
use crate::http::{Request, RequestMode, Response, resolve};
use crate::network::Fetch;

pub use connection::CacheDb;
pub use entries::check_cacheable;

/// Backing store for cache generations.
///
/// Each call is atomic from the caller's point of view; concurrent writers to
/// the same key resolve as last-write-wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the generation if absent. Returns true if it was created.
    async fn open(&self, name: &str) -> Result<bool, Error>;

    /// Generation names in creation order.
    async fn keys(&self) -> Result<Vec<String>, Error>;

    async fn has(&self, name: &str) -> Result<bool, Error>;

    /// Delete a generation with all of its entries.
    async fn delete(&self, name: &str) -> Result<bool, Error>;

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), Error>;

    /// Write a batch; all entries land or none do.
    async fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<(), Error>;

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>, Error>;

    /// First match across all generations, oldest first.
    async fn match_any(&self, request: &Request) -> Result<Option<Response>, Error>;

    /// Stored URLs of one generation.
    async fn entries(&self, name: &str) -> Result<Vec<String>, Error>;
}

#[async_trait]
impl CacheStorage for CacheDb {
    async fn open(&self, name: &str) -> Result<bool, Error> {
        self.open_generation(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        self.generation_names().await
    }

    async fn has(&self, name: &str) -> Result<bool, Error> {
        self.has_generation(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        self.delete_generation(name).await
    }

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), Error> {
        self.put_entry(name, request, response).await
    }

    async fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<(), Error> {
        self.put_entries(name, entries).await
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>, Error> {
        self.match_entry(name, request).await
    }

    async fn match_any(&self, request: &Request) -> Result<Option<Response>, Error> {
        self.match_any_entry(request).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<String>, Error> {
        self.entry_urls(name).await
    }
}

/// Storage-wide cache operations.
#[derive(Clone)]
pub struct Caches {
    storage: Arc<dyn CacheStorage>,
}

impl Caches {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    /// Open a generation, creating it if absent.
    pub async fn open(&self, name: &str) -> Result<Cache, Error> {
        if self.storage.open(name).await? {
            tracing::debug!(generation = name, "created cache generation");
        }
        Ok(Cache { name: name.to_string(), storage: Arc::clone(&self.storage) })
    }

    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        self.storage.keys().await
    }

    pub async fn has(&self, name: &str) -> Result<bool, Error> {
        self.storage.has(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool, Error> {
        self.storage.delete(name).await
    }

    /// Look a request up in every generation.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, Error> {
        self.storage.match_any(request).await
    }
}

/// Handle to one opened generation.
#[derive(Clone)]
pub struct Cache {
    name: String,
    storage: Arc<dyn CacheStorage>,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), Error> {
        self.storage.put(&self.name, request, response).await
    }

    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, Error> {
        self.storage.match_in(&self.name, request).await
    }

    pub async fn urls(&self) -> Result<Vec<String>, Error> {
        self.storage.entries(&self.name).await
    }

    /// Fetch every path and store all responses, or store nothing.
    ///
    /// Paths are resolved against `origin` and fetched concurrently. A
    /// transport failure or a non-2xx status for any path fails the batch.
    pub async fn add_all(&self, network: &dyn Fetch, origin: &url::Url, paths: &[String]) -> Result<usize, Error> {
        let requests = paths
            .iter()
            .map(|path| -> Result<_, Error> {
                let url = resolve(origin, path).map_err(|e| install_failed(path, e))?;
                Ok((path, Request::get(url)?.with_mode(RequestMode::Cors)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = try_join_all(requests.into_iter().map(|(path, request)| async move {
            let response = network.fetch(&request).await.map_err(|e| install_failed(path, e))?;
            if !response.ok() {
                return Err(install_failed(path, format!("status {}", response.status)));
            }
            Ok::<_, Error>((request, response))
        }))
        .await?;

        self.storage
            .put_all(&self.name, &fetched)
            .await
            .map_err(|e| install_failed(&self.name, e))?;

        Ok(fetched.len())
    }
}

fn install_failed(asset: &str, reason: impl std::fmt::Display) -> Error {
    Error::InstallFailed { asset: asset.to_string(), reason: reason.to_string() }
}
