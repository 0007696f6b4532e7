//! Lifecycle and fetch events with their deferral handle.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;

use crate::http::Request;

/// Deferral handle: work handed to it keeps the event alive until it settles.
///
/// Tasks start immediately on the tokio runtime. Dropping the last handle
/// without calling [`WaitUntil::settled`] aborts whatever is still pending,
/// so hosts must hold it open.
#[derive(Clone, Default)]
pub struct WaitUntil {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the event's lifetime until `work` completes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(work);
    }

    /// Number of deferred tasks not yet collected.
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait for every deferred task, including ones added while waiting.
    pub async fn settled(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                return;
            }
            while let Some(joined) = batch.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::warn!("deferred task panicked: {e}");
                }
            }
        }
    }
}

/// An intercepted request plus the means to defer work past the response.
#[derive(Clone)]
pub struct FetchEvent {
    request: Request,
    wait_until: WaitUntil,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request, wait_until: WaitUntil::new() }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.wait_until.wait_until(work);
    }

    /// Deferral handle to settle after the response has been delivered.
    pub fn lifetime(&self) -> WaitUntil {
        self.wait_until.clone()
    }
}
