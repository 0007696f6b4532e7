//! Lifecycle controller: provisioning, generation switch-over and request
//! routing for one deployed version.
//!
//! A [`Worker`] is one instance bound to one [`CacheName`]. The host drives it
//! through `install`, then `activate`, then `handle_fetch` for every
//! intercepted request. State moves only forward (see [`WorkerState`]).

pub mod event;
pub mod host;
pub mod lifecycle;
pub mod router;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::Caches;
use crate::config::AppConfig;
use crate::manifest::{AssetManifest, CacheName};
use crate::network::Fetch;
use crate::{Error, http};

pub use event::{FetchEvent, WaitUntil};
pub use host::{ServiceHost, WorkerId};
pub use lifecycle::SwitchOver;
pub use router::{FetchDisposition, RequestClass, classify};
pub use state::WorkerState;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// One instance of the cache lifecycle controller.
pub struct Worker {
    id: WorkerId,
    cache_name: CacheName,
    manifest: AssetManifest,
    origin: url::Url,
    caches: Caches,
    network: Arc<dyn Fetch>,
    state: Mutex<WorkerState>,
}

impl Worker {
    /// Create a worker for `origin`, owning generation `cache_name`.
    pub fn new(
        origin: &str, cache_name: CacheName, manifest: AssetManifest, caches: Caches, network: Arc<dyn Fetch>,
    ) -> Result<Self, Error> {
        let origin = http::canonicalize(origin)?;
        Ok(Self {
            id: WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)),
            cache_name,
            manifest,
            origin,
            caches,
            network,
            state: Mutex::new(WorkerState::Parsed),
        })
    }

    /// Create a worker from deployment configuration.
    pub fn from_config(config: &AppConfig, caches: Caches, network: Arc<dyn Fetch>) -> Result<Self, Error> {
        Self::new(&config.origin, config.cache_name(), config.asset_manifest(), caches, network)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn cache_name(&self) -> &CacheName {
        &self.cache_name
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    pub fn origin(&self) -> &url::Url {
        &self.origin
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn network(&self) -> &Arc<dyn Fetch> {
        &self.network
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark this instance as superseded. It receives no further requests.
    pub fn mark_redundant(&self) -> Result<(), Error> {
        self.transition(WorkerState::Redundant)
    }

    pub(crate) fn transition(&self, to: WorkerState) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        *state = from.transition(to)?;
        tracing::info!(worker = %self.id, generation = %self.cache_name, %from, %to, "worker state changed");
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name)
            .field("origin", &self.origin.as_str())
            .field("state", &self.state())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_new_worker_is_parsed() {
        let (worker, _) = worker("v1.0.0", &["/"], shell_network()).await;
        assert_eq!(worker.state(), WorkerState::Parsed);
        assert_eq!(worker.cache_name().as_str(), "cache-v1.0.0");
        assert_eq!(worker.origin().as_str(), "https://app.example.com/");
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, _) = worker("v1", &["/"], shell_network()).await;
        let (b, _) = worker("v1", &["/"], shell_network()).await;
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_invalid_origin() {
        let db = Arc::new(crate::cache::CacheDb::open_in_memory().await.unwrap());
        let result = Worker::new(
            "ftp://files.example.com",
            CacheName::default(),
            AssetManifest::default(),
            Caches::new(db),
            shell_network(),
        );
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
