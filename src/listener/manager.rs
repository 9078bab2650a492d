//! Listener Manager
//!
//! Owns the named listener set and reconciles it with configuration.

use super::{Listener, LISTENER_CLOSED_REASON};
use crate::config::{duplicate_name, ListenerConfig};
use crate::connection::ConnectionServices;
use crate::events::{ListenerAddEvent, ListenerRemoveEvent};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

pub const SHUTDOWN_REASON: &str = "Server is shutting down.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Listener name conflict: {0}")]
    DuplicateName(String),
    #[error("no listeners are bound")]
    NoListeners,
    #[error("listener manager is shutting down")]
    ShuttingDown,
}

/// What a start or reload changed, by listener name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

type ListenerMap = HashMap<String, Arc<Listener>>;

pub struct ListenerManager {
    services: ConnectionServices,
    shutdown_timeout: Duration,
    listeners: ArcSwap<ListenerMap>,
    reload_lock: Mutex<()>,
    closed: AtomicBool,
}

impl ListenerManager {
    pub fn new(services: ConnectionServices, shutdown_timeout: Duration) -> Self {
        Self {
            services,
            shutdown_timeout,
            listeners: ArcSwap::from_pointee(HashMap::new()),
            reload_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Reject configurations that would bind two listeners under one name
    pub fn validate(configs: &[ListenerConfig]) -> Result<(), ManagerError> {
        match duplicate_name(configs) {
            Some(name) => Err(ManagerError::DuplicateName(name.to_string())),
            None => Ok(()),
        }
    }

    /// Initial bind of every configured listener
    pub async fn start(&self, configs: Vec<ListenerConfig>) -> Result<ReloadReport, ManagerError> {
        info!("Starting {} listener(s)", configs.len());
        self.reload(configs).await
    }

    /// Bring the listener set in line with `configs`.
    ///
    /// Nothing is touched when validation fails. Listeners whose name
    /// disappears are closed, new names are bound, and persisting names get
    /// the new snapshot (or are rebound when their endpoint moved). A failed
    /// bind is reported but does not stop its siblings.
    pub async fn reload(&self, configs: Vec<ListenerConfig>) -> Result<ReloadReport, ManagerError> {
        Self::validate(&configs)?;

        let _guard = self.reload_lock.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ManagerError::ShuttingDown);
        }

        let current = self.listeners.load_full();
        let mut next = ListenerMap::with_capacity(configs.len());
        let mut report = ReloadReport::default();

        for (name, listener) in current.iter() {
            if configs.iter().all(|config| &config.name != name) {
                listener.close(LISTENER_CLOSED_REASON).await;
                self.services
                    .events
                    .listener_remove
                    .dispatch(&mut ListenerRemoveEvent { name: name.clone() });
                info!(listener = %name, "Listener removed");
                report.removed.push(name.clone());
            }
        }

        for config in configs {
            let name = config.name.clone();
            match current.get(&name) {
                Some(existing) if existing.config().endpoint() == config.endpoint() => {
                    existing.swap_config(config);
                    self.fire_added(existing);
                    debug!(listener = %name, "Listener configuration updated");
                    next.insert(name.clone(), existing.clone());
                    report.updated.push(name);
                }
                Some(existing) => {
                    info!(
                        listener = %name,
                        from = %existing.local_addr(),
                        to = %config.endpoint(),
                        "Listener endpoint changed, rebinding"
                    );
                    existing.close(LISTENER_CLOSED_REASON).await;
                    match self.bind(config) {
                        Some(listener) => {
                            next.insert(name.clone(), listener);
                            report.updated.push(name);
                        }
                        None => report.failed.push(name),
                    }
                }
                None => match self.bind(config) {
                    Some(listener) => {
                        next.insert(name.clone(), listener);
                        report.added.push(name);
                    }
                    None => report.failed.push(name),
                },
            }
        }

        let bound = next.len();
        self.listeners.store(Arc::new(next));
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Listener set reconciled"
        );

        if bound == 0 {
            return Err(ManagerError::NoListeners);
        }
        Ok(report)
    }

    fn bind(&self, config: ListenerConfig) -> Option<Arc<Listener>> {
        match Listener::bind(config, self.services.clone(), self.shutdown_timeout) {
            Ok(listener) => {
                self.fire_added(&listener);
                Some(listener)
            }
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    fn fire_added(&self, listener: &Listener) {
        self.services.events.listener_add.dispatch(&mut ListenerAddEvent {
            name: listener.name().to_string(),
            local_addr: listener.local_addr(),
        });
    }

    /// Stop every listener and tell every open connection why.
    ///
    /// Waits at most `shutdown_timeout`; repeated calls return immediately.
    pub async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.reload_lock.lock().await;
        let listeners = self.listeners.swap(Arc::new(HashMap::new()));

        let start_time = Instant::now();
        info!(
            "Closing {} listener(s) and {} open connection(s)",
            listeners.len(),
            self.services.registry.open_connections()
        );

        let mut closing = JoinSet::new();
        for listener in listeners.values() {
            let listener = listener.clone();
            let reason = reason.to_string();
            closing.spawn(async move { listener.close(&reason).await });
        }
        for connection in self.services.registry.snapshot() {
            connection.request_close(reason);
        }

        let finished = timeout(self.shutdown_timeout, async {
            while closing.join_next().await.is_some() {}
        })
        .await;

        let remaining = self.services.registry.open_connections();
        if finished.is_ok() && remaining == 0 {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start_time.elapsed(),
                remaining
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn listener(&self, name: &str) -> Option<Arc<Listener>> {
        self.listeners.load().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
