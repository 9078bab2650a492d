//! Connection Types

use crate::forward::Destination;
use std::fmt;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tokio::sync::Notify;
use uuid::Uuid;

/// Unique identifier for a connection, handed out by the traffic registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle position of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Accepted = 0,
    Authenticating = 1,
    Rejected = 2,
    Established = 3,
    Joined = 4,
    Closing = 5,
    Closed = 6,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Accepted,
            1 => ConnectionState::Authenticating,
            2 => ConnectionState::Rejected,
            3 => ConnectionState::Established,
            4 => ConnectionState::Joined,
            5 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared view of one accepted connection.
///
/// The connection task owns the socket; everything else (registry, events,
/// console) reaches the connection through this handle.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    listener: String,
    peer_addr: SocketAddr,
    accepted_at: Instant,
    state: AtomicU8,
    protocol_version: AtomicI32,
    client_addr: OnceLock<SocketAddr>,
    destination: OnceLock<Destination>,
    forwarded_uuid: OnceLock<Uuid>,
    player_name: OnceLock<String>,
    joined: AtomicBool,
    close_requested: AtomicBool,
    close_reason: Mutex<Option<String>>,
    close_notify: Notify,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, listener: impl Into<String>, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            listener: listener.into(),
            peer_addr,
            accepted_at: Instant::now(),
            state: AtomicU8::new(ConnectionState::Accepted as u8),
            protocol_version: AtomicI32::new(-1),
            client_addr: OnceLock::new(),
            destination: OnceLock::new(),
            forwarded_uuid: OnceLock::new(),
            player_name: OnceLock::new(),
            joined: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Name of the listener that accepted this connection
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Socket peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Client address as reported by forwarding, falling back to the peer
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr.get().copied().unwrap_or(self.peer_addr)
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.get()
    }

    pub fn forwarded_uuid(&self) -> Option<Uuid> {
        self.forwarded_uuid.get().copied()
    }

    pub fn age(&self) -> std::time::Duration {
        self.accepted_at.elapsed()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the connection is already further along.
    /// Returns the state that was current before the call.
    pub fn advance(&self, next: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.fetch_max(next as u8, Ordering::AcqRel))
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version.load(Ordering::Acquire)
    }

    pub fn set_protocol_version(&self, version: i32) {
        self.protocol_version.store(version, Ordering::Release);
    }

    pub fn player_name(&self) -> Option<&str> {
        self.player_name.get().map(String::as_str)
    }

    /// Record the login name; later calls are ignored
    pub fn set_player_name(&self, name: String) -> bool {
        self.player_name.set(name).is_ok()
    }

    /// Replace the reported identity with forwarded data.
    ///
    /// Only allowed while authenticating, and only once.
    pub fn apply_forwarding(
        &self,
        client: SocketAddr,
        destination: Destination,
        uuid: Option<Uuid>,
    ) -> bool {
        if self.state() != ConnectionState::Authenticating {
            return false;
        }
        if self.client_addr.set(client).is_err() {
            return false;
        }
        let _ = self.destination.set(destination);
        if let Some(uuid) = uuid {
            let _ = self.forwarded_uuid.set(uuid);
        }
        true
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    /// Flag the session as joined; true only for the first caller
    pub fn mark_joined(&self) -> bool {
        let first = !self.joined.swap(true, Ordering::AcqRel);
        if first {
            self.advance(ConnectionState::Joined);
        }
        first
    }

    /// Ask the connection task to disconnect with `reason`.
    /// The first request wins; returns whether this call was it.
    pub fn request_close(&self, reason: impl Into<String>) -> bool {
        {
            let mut slot = self
                .close_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.close_requested.load(Ordering::Acquire) {
                return false;
            }
            *slot = Some(reason.into());
            self.close_requested.store(true, Ordering::Release);
        }
        self.close_notify.notify_waiters();
        true
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Marked for teardown, either by request or because the task is closing
    pub fn is_closing(&self) -> bool {
        self.close_requested.load(Ordering::Acquire) || self.state() >= ConnectionState::Closing
    }

    /// Resolves once a close has been requested
    pub async fn wait_for_close(&self) {
        loop {
            let mut notified = pin!(self.close_notify.notified());
            notified.as_mut().enable();
            if self.close_requested.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.player_name() {
            Some(name) => write!(f, "[{}|{}]", name, self.client_addr()),
            None => write!(f, "[{}]", self.client_addr()),
        }
    }
}
