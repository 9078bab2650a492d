//! Graceful Shutdown Handling
//!
//! Turns SIGTERM, SIGINT and console `stop` into one shutdown signal and
//! closes the listener set within the configured timeout.

use crate::listener::ListenerManager;
use crate::Result;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown without an OS signal, e.g. from the console
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Shutdown triggered with no subscribers");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        debug!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Close every listener and wait for connections, bounded by the timeout
    pub async fn shutdown_listeners(&self, manager: &ListenerManager, reason: &str) -> bool {
        info!("Initiating graceful shutdown of {} listener(s)", manager.len());
        let start_time = Instant::now();

        // The manager bounds its own wait; this guards against a stuck close
        let finished = tokio::time::timeout(
            self.timeout + Duration::from_secs(1),
            manager.close(reason),
        )
        .await
        .is_ok();

        if finished {
            info!("Listeners closed in {:?}", start_time.elapsed());
        } else {
            warn!("Listener shutdown did not finish after {:?}", start_time.elapsed());
        }

        finished
    }
}
