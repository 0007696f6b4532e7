//! Services the hosting platform offers a worker during its lifecycle.

use async_trait::async_trait;

/// Process-unique identifier of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Platform hooks a worker calls while installing and activating.
#[async_trait]
pub trait ServiceHost: Send + Sync {
    /// Become eligible for activation as soon as install succeeds, without
    /// waiting for clients of the previous instance to go away.
    async fn skip_waiting(&self, worker: WorkerId);

    /// Take control of every client already connected.
    async fn claim_clients(&self, worker: WorkerId);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every hook call in order.
    #[derive(Default)]
    pub struct RecordingHost {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHost {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceHost for RecordingHost {
        async fn skip_waiting(&self, worker: WorkerId) {
            self.calls.lock().unwrap().push(format!("skip_waiting:{worker}"));
        }

        async fn claim_clients(&self, worker: WorkerId) {
            self.calls.lock().unwrap().push(format!("claim_clients:{worker}"));
        }
    }
}
