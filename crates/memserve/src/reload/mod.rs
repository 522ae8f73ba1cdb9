//! Live-reload notification channel.
//!
//! Browser tabs open a WebSocket to [`SOCKET_PATH`]; each open socket is
//! registered here with an outbound queue. Writes to the store call
//! [`ReloadChannel::notify_reload`], which pushes `{"type":"reload"}` to
//! every live connection. A heartbeat pings all connections on a fixed
//! interval and evicts the ones that never answered the previous ping.
//!
//! The registry only tracks connections. Sockets are owned by their
//! per-connection task in [`socket`].

mod client;
mod socket;

pub use client::{client_script, injection_snippet};
pub(crate) use socket::handle_upgrade;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Reserved URL namespace for everything the server injects.
pub const NAMESPACE: &str = "/@@/memserve";

/// Path browsers connect to for reload events.
pub const SOCKET_PATH: &str = "/@@/memserve/ws";

/// Path of the injected reload client.
pub const CLIENT_PATH: &str = "/@@/memserve/client.js";

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Capacity of each connection's outbound queue.
const OUTBOUND_CAPACITY: usize = 16;

/// Events pushed to browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadEvent {
    /// Reload the page
    Reload,
}

/// Frames queued for a single connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized event, sent as a text frame
    Event(String),
    /// Heartbeat ping
    Ping,
    /// Close the socket
    Close,
}

pub type ConnectionId = u64;

#[derive(Debug)]
struct Connection {
    tx: mpsc::Sender<Outbound>,
    /// Cleared when a ping goes out, set again by the pong
    alive: bool,
    last_pong: Instant,
}

struct Inner {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    heartbeat: Duration,
}

/// Registry of live reload connections.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ReloadChannel {
    inner: Arc<Inner>,
}

impl Default for ReloadChannel {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}

impl std::fmt::Debug for ReloadChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadChannel")
            .field("connections", &self.connection_count())
            .field("heartbeat", &self.inner.heartbeat)
            .finish()
    }
}

impl ReloadChannel {
    /// Create an empty registry with the given heartbeat interval.
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                heartbeat,
            }),
        }
    }

    /// Heartbeat interval.
    pub fn heartbeat(&self) -> Duration {
        self.inner.heartbeat
    }

    /// Register an open connection.
    ///
    /// Returns the connection id and the queue its writer must drain.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        self.inner.connections.write().insert(
            id,
            Connection {
                tx,
                alive: true,
                last_pong: Instant::now(),
            },
        );

        tracing::debug!(id, "reload client connected");
        (id, rx)
    }

    /// Remove a closed connection.
    pub fn unregister(&self, id: ConnectionId) {
        if self.inner.connections.write().remove(&id).is_some() {
            tracing::debug!(id, "reload client disconnected");
        }
    }

    /// Record a pong from `id`.
    pub fn mark_alive(&self, id: ConnectionId) {
        if let Some(conn) = self.inner.connections.write().get_mut(&id) {
            conn.alive = true;
            conn.last_pong = Instant::now();
        }
    }

    /// Time since `id` last answered a ping.
    pub fn since_last_pong(&self, id: ConnectionId) -> Option<Duration> {
        self.inner
            .connections
            .read()
            .get(&id)
            .map(|conn| conn.last_pong.elapsed())
    }

    /// Send `event` to every live connection.
    ///
    /// Iterates a snapshot of the registry. Connections whose queue is
    /// closed are pruned; a full queue drops this one event for that
    /// connection only. Returns how many connections accepted the event.
    pub fn broadcast(&self, event: &ReloadEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize reload event");
                return 0;
            }
        };

        let snapshot: Vec<(ConnectionId, mpsc::Sender<Outbound>)> = self
            .inner
            .connections
            .read()
            .iter()
            .map(|(id, conn)| (*id, conn.tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(Outbound::Event(json.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(id, "reload queue full, skipping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut connections = self.inner.connections.write();
            for id in dead {
                connections.remove(&id);
                tracing::debug!(id, "pruned closed reload client");
            }
        }

        delivered
    }

    /// Tell every browser to reload.
    pub fn notify_reload(&self) -> usize {
        self.broadcast(&ReloadEvent::Reload)
    }

    /// Run one heartbeat round.
    ///
    /// A connection that has not answered the previous ping is told to
    /// close and removed; every other connection is marked pending and
    /// pinged. Returns the number of evicted connections.
    pub fn heartbeat_tick(&self) -> usize {
        let mut connections = self.inner.connections.write();
        let mut evicted = Vec::new();

        for (id, conn) in connections.iter_mut() {
            if !conn.alive {
                let _ = conn.tx.try_send(Outbound::Close);
                evicted.push(*id);
                continue;
            }

            conn.alive = false;
            if let Err(mpsc::error::TrySendError::Closed(_)) = conn.tx.try_send(Outbound::Ping) {
                evicted.push(*id);
            }
        }

        for id in &evicted {
            connections.remove(id);
            tracing::debug!(id, "evicted unresponsive reload client");
        }

        evicted.len()
    }

    /// Drive [`heartbeat_tick`](Self::heartbeat_tick) until `shutdown` flips.
    pub fn spawn_heartbeat(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let channel = self.clone();
        let period = self.inner.heartbeat;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = channel.heartbeat_tick();
                        if evicted > 0 {
                            tracing::info!(evicted, "dropped unresponsive reload clients");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Ask every connection to close and forget them all.
    pub fn close_all(&self) {
        let mut connections = self.inner.connections.write();
        for conn in connections.values() {
            let _ = conn.tx.try_send(Outbound::Close);
        }
        connections.clear();
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }
}
