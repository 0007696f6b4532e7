//! Connected clients and the worker controlling each one.
//!
//! The table is bounded: clients silent for longer than the idle window are
//! swept when a new client arrives, and past the cap the least recently
//! seen client is dropped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use shellcache_core::WorkerId;

/// Opaque identity of a requesting client (a browser tab, an app instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// `None` means uncontrolled.
    controller: Option<WorkerId>,
    seen: Instant,
}

/// Recently seen clients.
#[derive(Debug)]
pub struct Clients {
    entries: Mutex<HashMap<ClientId, Entry>>,
    max_clients: usize,
    idle: Duration,
}

impl Clients {
    pub fn with_limits(max_clients: usize, idle: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), max_clients: max_clients.max(1), idle }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ClientId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a client, leaving its controller untouched if already known.
    pub fn touch(&self, client: &ClientId) {
        self.upsert(client, |_| {});
    }

    pub fn controller(&self, client: &ClientId) -> Option<WorkerId> {
        self.entries().get(client).and_then(|e| e.controller)
    }

    /// Put one client under `worker`, as a navigation does.
    pub fn adopt(&self, client: &ClientId, worker: WorkerId) {
        self.upsert(client, |entry| entry.controller = Some(worker));
    }

    /// Put every known client under `worker`. Returns how many changed hands.
    pub fn claim_all(&self, worker: WorkerId) -> usize {
        let mut claimed = 0;
        for entry in self.entries().values_mut() {
            if entry.controller != Some(worker) {
                entry.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    pub fn controlled_by(&self, worker: WorkerId) -> usize {
        self.entries().values().filter(|e| e.controller == Some(worker)).count()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, client: &ClientId, update: impl FnOnce(&mut Entry)) {
        let now = Instant::now();
        let mut entries = self.entries();

        if let Some(entry) = entries.get_mut(client) {
            entry.seen = now;
            update(entry);
            return;
        }

        let idle = self.idle;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.seen) < idle);
        if entries.len() < before {
            tracing::debug!(swept = before - entries.len(), "forgot idle clients");
        }

        while entries.len() >= self.max_clients {
            let Some(oldest) = entries.iter().min_by_key(|(_, e)| e.seen).map(|(id, _)| id.clone()) else {
                break;
            };
            entries.remove(&oldest);
        }

        let mut entry = Entry { controller: None, seen: now };
        update(&mut entry);
        entries.insert(client.clone(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> ClientId {
        ClientId(id.to_string())
    }

    fn clients() -> Clients {
        Clients::with_limits(16, Duration::from_secs(60))
    }

    #[test]
    fn test_touch_is_uncontrolled() {
        let clients = clients();
        clients.touch(&client("tab-1"));
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.controller(&client("tab-1")), None);
    }

    #[test]
    fn test_touch_keeps_controller() {
        let clients = clients();
        clients.adopt(&client("tab-1"), WorkerId(7));
        clients.touch(&client("tab-1"));
        assert_eq!(clients.controller(&client("tab-1")), Some(WorkerId(7)));
    }

    #[test]
    fn test_claim_all() {
        let clients = clients();
        clients.touch(&client("a"));
        clients.adopt(&client("b"), WorkerId(1));
        clients.adopt(&client("c"), WorkerId(2));

        assert_eq!(clients.claim_all(WorkerId(2)), 2);
        assert_eq!(clients.controlled_by(WorkerId(2)), 3);
        assert_eq!(clients.controlled_by(WorkerId(1)), 0);
    }

    #[test]
    fn test_distinct_clients_stay_under_cap() {
        let clients = Clients::with_limits(64, Duration::from_secs(60));
        for n in 0..500 {
            clients.touch(&client(&format!("peer-{n}")));
        }
        assert_eq!(clients.len(), 64);
        assert!(clients.entries().contains_key(&client("peer-499")));
    }

    #[test]
    fn test_cap_evicts_least_recently_seen() {
        let clients = Clients::with_limits(2, Duration::from_secs(60));
        clients.adopt(&client("a"), WorkerId(1));
        std::thread::sleep(Duration::from_millis(2));
        clients.touch(&client("b"));
        std::thread::sleep(Duration::from_millis(2));
        clients.touch(&client("a"));
        std::thread::sleep(Duration::from_millis(2));
        clients.touch(&client("c"));

        assert_eq!(clients.len(), 2);
        assert_eq!(clients.controller(&client("a")), Some(WorkerId(1)));
        assert!(!clients.entries().contains_key(&client("b")));
    }

    #[test]
    fn test_idle_clients_are_swept() {
        let clients = Clients::with_limits(16, Duration::from_millis(20));
        clients.touch(&client("a"));
        clients.touch(&client("b"));
        std::thread::sleep(Duration::from_millis(40));

        clients.touch(&client("c"));

        assert_eq!(clients.len(), 1);
        assert!(clients.entries().contains_key(&client("c")));
    }
}
