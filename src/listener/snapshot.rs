//! Immutable per-listener configuration snapshot

use crate::config::ListenerConfig;
use crate::forward::ForwardAuthenticator;
use crate::protocol::StatusTemplate;
use std::sync::Arc;

/// Everything a connection needs from its listener's configuration.
///
/// Built once per configuration load and swapped as a whole; a connection
/// keeps the snapshot that was current when it was accepted.
#[derive(Debug)]
pub struct ListenerSnapshot {
    pub config: Arc<ListenerConfig>,
    pub forward: Arc<ForwardAuthenticator>,
    pub status: Arc<StatusTemplate>,
}

impl ListenerSnapshot {
    pub fn new(config: ListenerConfig) -> Self {
        let forward = ForwardAuthenticator::new(config.forward_mode, config.forward_secret.secrets());
        let status = StatusTemplate::from_config(&config.motd);
        Self {
            config: Arc::new(config),
            forward: Arc::new(forward),
            status: Arc::new(status),
        }
    }
}
