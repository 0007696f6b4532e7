//! Worker registration: install retry, promotion and request dispatch.
//!
//! A registration owns at most one active worker. Each client is controlled
//! by at most one worker; only requests from clients controlled by the
//! active worker are routed through it.
//!
//! Over HTTP there is no signal that a client has gone away, so there is no
//! waiting slot: a freshly installed worker replaces the active one only if
//! it asked to skip waiting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use shellcache_core::worker::{SwitchOver, WaitUntil};
use shellcache_core::{
    AppConfig, Caches, Error, Fetch, FetchDisposition, FetchEvent, Request, RequestMode, Response, ServiceHost,
    Worker, WorkerId, WorkerState,
};

use crate::clients::{ClientId, Clients};

#[derive(Default)]
struct Slots {
    active: Option<Arc<Worker>>,
    skip_waiting: HashSet<WorkerId>,
}

/// Outcome of dispatching one request.
pub struct Dispatched {
    /// What to send back. An error is a failed request.
    pub response: Result<Response, Error>,
    /// Deferred work to settle once the response is on its way.
    pub lifetime: WaitUntil,
}

/// The host side of the lifecycle: workers, clients and default networking.
pub struct Registration {
    config: AppConfig,
    caches: Caches,
    network: Arc<dyn Fetch>,
    clients: Clients,
    slots: Mutex<Slots>,
}

impl Registration {
    pub fn new(config: AppConfig, caches: Caches, network: Arc<dyn Fetch>) -> Self {
        let clients = Clients::with_limits(config.max_clients, config.client_idle());
        Self { config, caches, network, clients, slots: Mutex::new(Slots::default()) }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn active(&self) -> Option<Arc<Worker>> {
        self.slots().active.clone()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a worker built from the current configuration.
    pub async fn register_current(&self) -> Result<WorkerId, Error> {
        let worker = Worker::from_config(&self.config, self.caches.clone(), Arc::clone(&self.network))?;
        self.register(worker).await
    }

    /// Install `worker`, then activate it.
    ///
    /// A worker that asked to skip waiting, or arrives when nothing is
    /// active, is promoted at once; any other is retired and the active
    /// worker stays. A failed install leaves the current active worker in
    /// place.
    pub async fn register(&self, worker: Worker) -> Result<WorkerId, Error> {
        let worker = Arc::new(worker);
        let id = worker.id();

        let installed = worker.install(self).await;
        let skipped = self.slots().skip_waiting.remove(&id);
        installed?;

        if !skipped && self.active().is_some() {
            tracing::info!(worker = %id, "installed worker did not skip waiting, keeping the active one");
            retire(&worker);
            return Ok(id);
        }

        self.promote(worker).await?;
        Ok(id)
    }

    /// Keep registering until an install succeeds or retries are disabled.
    pub async fn install_with_retry(&self) {
        loop {
            let err = match self.register_current().await {
                Ok(id) => {
                    tracing::info!(worker = %id, generation = %self.config.cache_name(), "worker registered");
                    return;
                }
                Err(e) => e,
            };

            match self.config.install_retry() {
                Some(delay) => {
                    tracing::warn!(error = %err, retry_in_secs = delay.as_secs(), "install failed, will retry");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(error = %err, "install failed, retries disabled");
                    return;
                }
            }
        }
    }

    async fn promote(&self, worker: Arc<Worker>) -> Result<SwitchOver, Error> {
        let previous = self.slots().active.replace(Arc::clone(&worker));

        if let Some(previous) = previous {
            retire(&previous);
        }

        worker.activate(self).await
    }

    /// Route one request from `client`.
    ///
    /// A navigation puts the client under the active worker. Requests from
    /// clients the active worker controls go through it; everything else
    /// gets default network handling.
    pub async fn dispatch(&self, client: &ClientId, request: Request) -> Dispatched {
        self.clients.touch(client);
        let active = self.active();

        if let Some(worker) = &active
            && request.mode() == RequestMode::Navigate
            && worker.state() == WorkerState::Activated
        {
            self.clients.adopt(client, worker.id());
        }

        let controller = self.clients.controller(client);
        if let Some(worker) = active.filter(|w| Some(w.id()) == controller) {
            let event = FetchEvent::new(request);
            let response = match worker.handle_fetch(&event).await {
                FetchDisposition::Respond(response) => response,
                FetchDisposition::Passthrough => self.network.fetch(event.request()).await,
            };
            return Dispatched { response, lifetime: event.lifetime() };
        }

        Dispatched { response: self.network.fetch(&request).await, lifetime: WaitUntil::new() }
    }
}

fn retire(worker: &Worker) {
    if let Err(e) = worker.mark_redundant() {
        tracing::warn!(worker = %worker.id(), error = %e, "could not retire worker");
    }
}

#[async_trait]
impl ServiceHost for Registration {
    async fn skip_waiting(&self, worker: WorkerId) {
        self.slots().skip_waiting.insert(worker);
    }

    async fn claim_clients(&self, worker: WorkerId) {
        let claimed = self.clients.claim_all(worker);
        tracing::info!(worker = %worker, claimed, "claimed clients");
    }
}
