//! Traffic Registry
//!
//! Process-wide byte counters and the set of open connections. One
//! instance is created at startup and shared by every listener.

use super::TrafficStatus;
use crate::connection::{ConnectionHandle, ConnectionId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct TrafficRegistry {
    rx: AtomicU64,
    tx: AtomicU64,
    total_connections: AtomicU64,
    next_connection_id: AtomicU64,
    open: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl Default for TrafficRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficRegistry {
    pub fn new() -> Self {
        Self {
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(1),
            open: DashMap::new(),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Bytes read from client sockets
    pub fn record_rx(&self, bytes: u64) {
        self.rx.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes written to client sockets
    pub fn record_tx(&self, bytes: u64) {
        self.tx.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    /// Add to the open set; false if it was already there
    pub fn register(&self, connection: Arc<ConnectionHandle>) -> bool {
        let id = connection.id();
        match self.open.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                self.total_connections.fetch_add(1, Ordering::Relaxed);
                debug!(connection = %id, open = self.open.len(), "Connection registered");
                true
            }
        }
    }

    /// Remove from the open set; repeated calls are no-ops
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.open.remove(&id).is_some();
        if removed {
            debug!(connection = %id, "Connection unregistered");
        }
        removed
    }

    pub fn open_connections(&self) -> usize {
        self.open.len()
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Clone of every open handle; no map lock is held by the caller
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.open.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn joined(&self) -> Vec<Arc<ConnectionHandle>> {
        self.open
            .iter()
            .filter(|entry| entry.value().is_joined())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn status(&self) -> TrafficStatus {
        let mut joined: Vec<(ConnectionId, String)> = self
            .joined()
            .iter()
            .map(|conn| (conn.id(), conn.to_string()))
            .collect();
        joined.sort();

        TrafficStatus {
            open: self.open_connections(),
            total: self.total_connections(),
            rx: self.rx(),
            tx: self.tx(),
            joined: joined.into_iter().map(|(_, name)| name).collect(),
        }
    }
}
