//! Listener
//!
//! One bound endpoint: the accept loop, the tasks of the connections it
//! accepted, and the configuration snapshot new connections start from.

use super::ListenerSnapshot;
use crate::config::ListenerConfig;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionLifecycle, ConnectionServices, ConnectionState};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

const LISTEN_BACKLOG: u32 = 1024;

pub const LISTENER_CLOSED_REASON: &str = "This listener has been closed.";

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind listener '{name}' to {addr}: {source}")]
    Bind {
        name: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

type ConnectionSet = Arc<DashMap<ConnectionId, Arc<ConnectionHandle>>>;

pub struct Listener {
    name: String,
    local_addr: SocketAddr,
    snapshot: Arc<ArcSwap<ListenerSnapshot>>,
    connections: ConnectionSet,
    shutdown_tx: watch::Sender<Option<String>>,
    closed: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Bind the configured endpoint and start accepting.
    ///
    /// `close_grace` bounds how long [`Listener::close`] waits for open
    /// connections before aborting them.
    pub fn bind(
        config: ListenerConfig,
        services: ConnectionServices,
        close_grace: Duration,
    ) -> Result<Arc<Self>, ListenerError> {
        let name = config.name.clone();
        let addr = config.endpoint();
        let bind_error = |source| ListenerError::Bind {
            name: name.clone(),
            addr,
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let tcp = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
        let local_addr = tcp.local_addr().map_err(bind_error)?;

        info!(
            listener = %name,
            addr = %local_addr,
            backend = io_backend(),
            forward_mode = %config.forward_mode,
            "Listener bound"
        );

        let snapshot = Arc::new(ArcSwap::from_pointee(ListenerSnapshot::new(config)));
        let connections: ConnectionSet = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(None);

        let accept_loop = AcceptLoop {
            name: name.clone(),
            tcp,
            snapshot: snapshot.clone(),
            connections: connections.clone(),
            services,
            close_grace,
            tasks: JoinSet::new(),
        };
        let accept_task = tokio::spawn(accept_loop.run(shutdown_rx));

        Ok(Arc::new(Self {
            name,
            local_addr,
            snapshot,
            connections,
            shutdown_tx,
            closed: AtomicBool::new(false),
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address actually bound, with the OS-assigned port when 0 was configured
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn snapshot(&self) -> Arc<ListenerSnapshot> {
        self.snapshot.load_full()
    }

    pub fn config(&self) -> Arc<ListenerConfig> {
        self.snapshot.load().config.clone()
    }

    /// Replace the snapshot used by connections accepted from now on
    pub fn swap_config(&self, config: ListenerConfig) {
        debug!(listener = %self.name, "Swapping listener configuration");
        self.snapshot.store(Arc::new(ListenerSnapshot::new(config)));
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting and close every connection this listener owns.
    ///
    /// Returns once the accept loop has finished; later calls wait for the
    /// first one and then return.
    pub async fn close(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(listener = %self.name, reason, "Closing listener");
            self.shutdown_tx.send_replace(Some(reason.to_string()));
        }

        let mut accept_task = self.accept_task.lock().await;
        if let Some(task) = accept_task.take() {
            if let Err(e) = task.await {
                error!(listener = %self.name, "Accept loop failed: {}", e);
            }
        }
    }
}

struct AcceptLoop {
    name: String,
    tcp: TcpListener,
    snapshot: Arc<ArcSwap<ListenerSnapshot>>,
    connections: ConnectionSet,
    services: ConnectionServices,
    close_grace: Duration,
    tasks: JoinSet<()>,
}

impl AcceptLoop {
    #[instrument(name = "listener", skip_all, fields(name = %self.name))]
    async fn run(mut self, mut shutdown_rx: watch::Receiver<Option<String>>) {
        debug!("Starting connection acceptance loop");

        let reason = loop {
            tokio::select! {
                accepted = self.tcp.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            // Per-connection accept errors; keep accepting
                            warn!("Error accepting connection: {}", e);
                        }
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection task panicked: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped listener closes like a removed one
                    if changed.is_err() {
                        break LISTENER_CLOSED_REASON.to_string();
                    }
                    if let Some(reason) = shutdown_rx.borrow_and_update().clone() {
                        break reason;
                    }
                }
            }
        };

        debug!("Connection acceptance loop stopped");
        self.shutdown(reason).await;
    }

    fn spawn_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, "Failed to set TCP_NODELAY: {}", e);
        }

        let snapshot = self.snapshot.load_full();
        let id = self.services.registry.next_connection_id();
        let connection = Arc::new(ConnectionHandle::new(id, self.name.clone(), addr));
        debug!(connection = %id, addr = %addr, "Accepted connection");

        let slot = ConnectionSlot::new(connection.clone(), &self.connections, &self.services);
        let lifecycle = ConnectionLifecycle::new(connection, snapshot, &self.services);
        self.tasks.spawn(async move {
            let _slot = slot;
            lifecycle.run(stream).await;
        });
    }

    async fn shutdown(mut self, reason: String) {
        drop(self.tcp);

        let open: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if !open.is_empty() {
            info!(
                "Waiting for {} active connections to close (timeout: {:?})",
                open.len(),
                self.close_grace
            );
        }
        for connection in &open {
            connection.request_close(reason.as_str());
        }

        let grace = self.close_grace;
        let tasks = &mut self.tasks;
        let drained = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                grace,
                tasks.len()
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

/// Membership of one connection in its listener's set.
///
/// Dropped when the connection task ends, including by panic or abort,
/// so the task never leaves a stale entry behind.
struct ConnectionSlot {
    connection: Arc<ConnectionHandle>,
    connections: ConnectionSet,
    services: ConnectionServices,
}

impl ConnectionSlot {
    fn new(
        connection: Arc<ConnectionHandle>,
        connections: &ConnectionSet,
        services: &ConnectionServices,
    ) -> Self {
        connections.insert(connection.id(), connection.clone());
        Self {
            connection,
            connections: connections.clone(),
            services: services.clone(),
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let id = self.connection.id();
        self.connections.remove(&id);
        if self.connection.state() != ConnectionState::Closed {
            self.connection.advance(ConnectionState::Closed);
            self.services.registry.unregister(id);
        }
    }
}

/// Readiness backend mio selects for the target OS. Tokio does not expose
/// the driver it picked, so this is inferred at compile time.
fn io_backend() -> &'static str {
    if cfg!(any(target_os = "linux", target_os = "android")) {
        "epoll"
    } else if cfg!(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )) {
        "kqueue"
    } else if cfg!(windows) {
        "IOCP"
    } else {
        "poll"
    }
}
