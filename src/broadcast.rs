//! Server-push broadcaster behind the GET /events endpoint.
//!
//! The broadcaster owns a registry of live connections keyed by a generated
//! connection id that encodes its creation timestamp. Each connection holds
//! an unbounded channel sender; the HTTP handler drains the matching receiver
//! into the SSE response body.
//!
//! Delivery is at-most-once and best-effort: a failed push (the client went
//! away and dropped its receiver) removes that one connection and never
//! aborts delivery to the rest. A periodic heartbeat keeps proxies from
//! closing idle connections, and a sweep removes connections that have not
//! accepted a push within the idle timeout.
//!
//! The registry mutex is held only for map operations, never across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::DomainEvent;

/// How often a heartbeat is pushed to each connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How often the stale-connection sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Connections that have not accepted a push for this long are dropped.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct Connection {
    tx: mpsc::UnboundedSender<DomainEvent>,
    last_push: Instant,
}

/// Registry of live event-stream connections.
///
/// Cheap to clone; all clones share one registry. Owned by `AppState` and
/// injected into handlers rather than living in a process global.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<Mutex<HashMap<String, Connection>>>,
    next_seq: Arc<AtomicU64>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Generate a connection id encoding the creation timestamp plus a
    /// sequence number to disambiguate same-millisecond registrations.
    fn next_connection_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:04}", Utc::now().timestamp_millis(), seq)
    }

    /// Register a new connection and synchronously push the initial
    /// `connected` event so the client can confirm the stream is live before
    /// any real event arrives.
    pub fn register(&self, tx: mpsc::UnboundedSender<DomainEvent>) -> String {
        let id = self.next_connection_id();

        // Unbounded send cannot block; a failure here means the client is
        // already gone, in which case we simply don't register it.
        if tx.send(DomainEvent::connected(&id)).is_err() {
            warn!(connection_id = %id, "Client vanished before registration");
            return id;
        }

        let mut connections = self.connections.lock().expect("broadcaster lock poisoned");
        connections.insert(
            id.clone(),
            Connection {
                tx,
                last_push: Instant::now(),
            },
        );
        info!(connection_id = %id, total = connections.len(), "Event stream connected");
        id
    }

    /// Idempotent removal; unknown ids are a no-op.
    pub fn unregister(&self, connection_id: &str) {
        let mut connections = self.connections.lock().expect("broadcaster lock poisoned");
        if connections.remove(connection_id).is_some() {
            info!(connection_id = %connection_id, total = connections.len(), "Event stream disconnected");
        }
    }

    /// Push an event to every registered connection.
    ///
    /// A failed push removes that connection only; remaining connections
    /// still receive the event. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: DomainEvent) -> usize {
        let mut connections = self.connections.lock().expect("broadcaster lock poisoned");
        let mut failed: Vec<String> = Vec::new();
        let mut delivered = 0;

        for (id, connection) in connections.iter_mut() {
            if connection.tx.send(event.clone()).is_ok() {
                connection.last_push = Instant::now();
                delivered += 1;
            } else {
                failed.push(id.clone());
            }
        }

        for id in failed {
            connections.remove(&id);
            debug!(connection_id = %id, "Removed dead connection during broadcast");
        }

        debug!(kind = ?event.kind, delivered, "Broadcast event");
        delivered
    }

    /// Push a heartbeat to each connection independently. Failures trigger
    /// the same per-connection cleanup as broadcast failures.
    pub fn heartbeat(&self) -> usize {
        self.broadcast(DomainEvent::heartbeat())
    }

    /// Remove connections that have not accepted a push within `idle_timeout`.
    pub fn sweep_stale(&self, idle_timeout: Duration) -> usize {
        let mut connections = self.connections.lock().expect("broadcaster lock poisoned");
        let before = connections.len();
        connections.retain(|id, connection| {
            let alive = connection.last_push.elapsed() < idle_timeout;
            if !alive {
                debug!(connection_id = %id, "Swept stale connection");
            }
            alive
        });
        before - connections.len()
    }

    /// Current number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("broadcaster lock poisoned")
            .len()
    }

    /// Spawn the heartbeat and stale-sweep loops. Returns immediately; the
    /// loops run for the life of the process.
    pub fn spawn_maintenance(&self) {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            // First tick fires immediately; skip it so a fresh connection's
            // initial event stays first on the wire.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broadcaster.heartbeat();
            }
        });

        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = broadcaster.sweep_stale(IDLE_TIMEOUT);
                if removed > 0 {
                    info!(removed, "Stale connection sweep");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;

    fn subscribe(broadcaster: &Broadcaster) -> (String, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = broadcaster.register(tx);
        (id, rx)
    }

    #[tokio::test]
    async fn test_register_emits_connected_event() {
        let broadcaster = Broadcaster::new();
        let (id, mut rx) = subscribe(&broadcaster);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Connected);
        assert_eq!(first.payload["connection_id"], id);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_connections() {
        let broadcaster = Broadcaster::new();
        let (_, mut rx_a) = subscribe(&broadcaster);
        let (_, mut rx_b) = subscribe(&broadcaster);

        // Drain the connected events.
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        let delivered = broadcaster.broadcast(DomainEvent::new(
            EventKind::ActivityCreated,
            json!({ "id": "a1" }),
        ));
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.recv().await.unwrap().kind, EventKind::ActivityCreated);
        assert_eq!(rx_b.recv().await.unwrap().kind, EventKind::ActivityCreated);
    }

    #[tokio::test]
    async fn test_failed_push_does_not_abort_delivery() {
        let broadcaster = Broadcaster::new();
        let (_, mut rx_a) = subscribe(&broadcaster);
        let (_, rx_b) = subscribe(&broadcaster);
        let (_, mut rx_c) = subscribe(&broadcaster);
        assert_eq!(broadcaster.connection_count(), 3);

        // Simulate a client that went away mid-stream.
        drop(rx_b);

        let delivered = broadcaster.broadcast(DomainEvent::new(
            EventKind::ActivityUpdated,
            json!({ "id": "a1" }),
        ));
        assert_eq!(delivered, 2);

        // The dead connection is cleaned up; survivors got the event.
        assert_eq!(broadcaster.connection_count(), 2);
        rx_a.recv().await.unwrap(); // connected
        assert_eq!(rx_a.recv().await.unwrap().kind, EventKind::ActivityUpdated);
        rx_c.recv().await.unwrap(); // connected
        assert_eq!(rx_c.recv().await.unwrap().kind, EventKind::ActivityUpdated);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let (id, _rx) = subscribe(&broadcaster);
        assert_eq!(broadcaster.connection_count(), 1);

        broadcaster.unregister(&id);
        assert_eq!(broadcaster.connection_count(), 0);

        // Second removal of the same id is a no-op.
        broadcaster.unregister(&id);
        broadcaster.unregister("never-registered");
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_cleans_up_dead_connections() {
        let broadcaster = Broadcaster::new();
        let (_, rx_a) = subscribe(&broadcaster);
        let (_, mut rx_b) = subscribe(&broadcaster);
        drop(rx_a);

        let delivered = broadcaster.heartbeat();
        assert_eq!(delivered, 1);
        assert_eq!(broadcaster.connection_count(), 1);

        rx_b.recv().await.unwrap(); // connected
        assert_eq!(rx_b.recv().await.unwrap().kind, EventKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_connections() {
        let broadcaster = Broadcaster::new();
        let (_, _rx) = subscribe(&broadcaster);
        assert_eq!(broadcaster.connection_count(), 1);

        // Nothing has been pushed "recently" relative to a zero timeout.
        let removed = broadcaster.sweep_stale(Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert_eq!(broadcaster.connection_count(), 0);

        // A fresh connection survives a generous timeout.
        let (_, _rx2) = subscribe(&broadcaster);
        assert_eq!(broadcaster.sweep_stale(Duration::from_secs(600)), 0);
        assert_eq!(broadcaster.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let broadcaster = Broadcaster::new();
        let (id_a, _rx_a) = subscribe(&broadcaster);
        let (id_b, _rx_b) = subscribe(&broadcaster);
        assert_ne!(id_a, id_b);
    }
}
