//! Liveness bookkeeping for connected clients. Pure data structure; the
//! server thread drives it with its own notion of "now", which keeps the
//! eviction rule directly testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use barkwatch_events::ClientId;

pub struct ClientRegistry {
    clients: HashMap<ClientId, Instant>,
    timeout: Duration,
}

impl ClientRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            timeout,
        }
    }

    /// Marks the client live as of `now`, inserting it on first contact.
    /// Any traffic counts, heartbeats included.
    pub fn touch(&mut self, id: ClientId, now: Instant) {
        self.clients.insert(id, now);
    }

    /// Returns whether the client was present.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Removes and returns every client silent for at least the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<ClientId> {
        let timeout = self.timeout;
        let mut evicted = Vec::new();
        self.clients.retain(|id, last_seen| {
            let stale = now.duration_since(*last_seen) >= timeout;
            if stale {
                evicted.push(id.clone());
            }
            !stale
        });
        evicted
    }

    pub fn ids(&self) -> impl Iterator<Item = &ClientId> {
        self.clients.keys()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
