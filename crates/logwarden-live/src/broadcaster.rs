use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Handle of one registered client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Updates buffered per client before it is considered stalled
pub const DEFAULT_CLIENT_BUFFER: usize = 256;

/// The set of open client connections and fan-out to them.
///
/// Each client is a bounded channel drained by its connection task. A broadcast
/// never waits: a client whose buffer is full is dropped. Broadcasts iterate
/// over a snapshot of the set, so connects and disconnects may happen at any time.
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<String>>>>,
    next_id: Arc<AtomicU64>,
    client_buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::with_client_buffer(DEFAULT_CLIENT_BUFFER)
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_buffer(client_buffer: usize) -> Self {
        Self {
            clients: Arc::default(),
            next_id: Arc::default(),
            client_buffer: client_buffer.max(1),
        }
    }

    /// Register a client. Messages broadcast from now on arrive on the
    /// returned receiver; nothing sent earlier is replayed.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.clients.write().insert(id, tx);
        debug!(client = %id, "live client connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        if self.clients.write().remove(&id).is_some() {
            debug!(client = %id, "live client disconnected");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Serialize once and deliver to every open client. A closed or stalled
    /// client is dropped. Returns how many clients received the message.
    pub fn broadcast<T: Serialize>(&self, payload: &T) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast payload");
                return 0;
            }
        };

        let snapshot: Vec<_> = self
            .clients
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            if tx.is_closed() {
                closed.push(id);
                continue;
            }
            match tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client = %id, "live client is not keeping up; dropping it");
                    closed.push(id);
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in closed {
                clients.remove(&id);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logwarden_types::{AnalysisId, LiveUpdate};

    fn update(id: i64) -> LiveUpdate {
        LiveUpdate {
            event_id: AnalysisId(id),
            log_message: "kernel: ERROR disk failure".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_broadcast_reaches_all_open_clients() {
        let broadcaster = Broadcaster::new();
        let (_, mut a) = broadcaster.connect();
        let (_, mut b) = broadcaster.connect();

        assert_eq!(broadcaster.broadcast(&update(1)), 2);

        let got: LiveUpdate = serde_json::from_str(&a.try_recv().unwrap()).unwrap();
        assert_eq!(got.event_id, AnalysisId(1));
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_closed_client_does_not_block_others() {
        let broadcaster = Broadcaster::new();
        let (_, dead) = broadcaster.connect();
        let (_, mut alive) = broadcaster.connect();
        drop(dead);

        assert_eq!(broadcaster.broadcast(&update(7)), 1);
        assert!(alive.try_recv().unwrap().contains("\"eventId\":7"));
        // The dead client was pruned
        assert_eq!(broadcaster.client_count(), 1);
    }

    #[test]
    fn test_no_replay_for_late_clients() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.broadcast(&update(1)), 0);

        let (id, mut late) = broadcaster.connect();
        assert!(late.try_recv().is_err());

        broadcaster.disconnect(id);
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[test]
    fn test_stalled_client_is_dropped() {
        let broadcaster = Broadcaster::with_client_buffer(2);
        let (_, mut stalled) = broadcaster.connect();
        let (_, mut reading) = broadcaster.connect();

        assert_eq!(broadcaster.broadcast(&update(1)), 2);
        assert!(reading.try_recv().is_ok());
        assert_eq!(broadcaster.broadcast(&update(2)), 2);
        assert!(reading.try_recv().is_ok());

        // The stalled client's buffer is full
        assert_eq!(broadcaster.broadcast(&update(3)), 1);
        assert_eq!(broadcaster.client_count(), 1);
        assert!(reading.try_recv().unwrap().contains("\"eventId\":3"));

        // Buffered updates stay readable, then the channel ends
        assert!(stalled.try_recv().is_ok());
        assert!(stalled.try_recv().is_ok());
        assert!(stalled.try_recv().is_err());
    }
}
