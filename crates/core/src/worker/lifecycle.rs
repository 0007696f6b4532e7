//! Install (provisioning) and activate (generation switch-over).

use futures_util::future::join_all;

use super::{ServiceHost, Worker, WorkerState};
use crate::Error;

/// What a switch-over did to the stale generations it found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchOver {
    pub deleted: Vec<String>,
    /// Stale generations whose deletion failed; a later switch-over retries.
    pub retained: Vec<String>,
}

impl Worker {
    /// Populate this worker's generation with every manifest asset.
    ///
    /// Asks the host to skip the waiting phase first. All-or-nothing: on any
    /// fetch or store failure the generation gains no entries, the worker
    /// moves to `Failed`, and the error is returned. The host decides whether
    /// to retry with a new instance.
    pub async fn install(&self, host: &dyn ServiceHost) -> Result<(), Error> {
        self.transition(WorkerState::Installing)?;
        host.skip_waiting(self.id).await;

        match self.provision().await {
            Ok(stored) => {
                tracing::info!(worker = %self.id, generation = %self.cache_name, stored, "generation provisioned");
                self.transition(WorkerState::Installed)
            }
            Err(e) => {
                tracing::warn!(worker = %self.id, generation = %self.cache_name, error = %e, "install failed");
                self.transition(WorkerState::Failed)?;
                Err(e)
            }
        }
    }

    async fn provision(&self) -> Result<usize, Error> {
        let cache = self.caches.open(self.cache_name.as_str()).await?;
        cache
            .add_all(self.network.as_ref(), &self.origin, self.manifest.paths())
            .await
    }

    /// Delete every stale generation, then claim open clients.
    ///
    /// A generation that fails to delete is logged and kept. Listing failures
    /// leave everything in place. Neither blocks activation.
    pub async fn activate(&self, host: &dyn ServiceHost) -> Result<SwitchOver, Error> {
        self.transition(WorkerState::Activating)?;

        let report = self.remove_stale_generations().await;
        if !report.deleted.is_empty() {
            tracing::info!(worker = %self.id, deleted = ?report.deleted, "removed stale generations");
        }

        host.claim_clients(self.id).await;
        self.transition(WorkerState::Activated)?;

        Ok(report)
    }

    async fn remove_stale_generations(&self) -> SwitchOver {
        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(worker = %self.id, error = %e, "could not list generations");
                return SwitchOver::default();
            }
        };

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| self.cache_name.is_stale(name))
            .collect();
        let results = join_all(stale.iter().map(|name| self.caches.delete(name))).await;

        let mut report = SwitchOver::default();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    tracing::warn!(generation = %name, error = %e, "failed to delete stale generation");
                    report.retained.push(name);
                }
            }
        }
        report
    }
}
