//! Configuration File Watcher
//!
//! Turns edits of the configuration file into reload requests.

use super::{Config, ConfigManager};
use crate::Result;
use anyhow::{bail, Context};
use arc_swap::ArcSwap;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    pub config: Arc<Config>,
    pub timestamp: std::time::SystemTime,
    pub file_path: PathBuf,
}

/// Configuration file watcher
pub struct ConfigWatcher {
    config_path: PathBuf,
    current_config: Arc<ArcSwap<Config>>,
    change_sender: broadcast::Sender<ConfigChangeEvent>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Create a new configuration watcher
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let (change_sender, _) = broadcast::channel(16);

        let initial_config = ConfigManager::load_from_file(&config_path)?;
        let current_config = Arc::new(ArcSwap::from_pointee(initial_config));

        let sender_clone = change_sender.clone();
        let config_clone = current_config.clone();
        let path_clone = config_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    Self::handle_file_event(event, &path_clone, &config_clone, &sender_clone)
                }
                Err(e) => error!("File watcher error: {}", e),
            },
            NotifyConfig::default(),
        )
        .context("Failed to create file watcher")?;

        // Watch the directory; editors often replace the file instead of writing in place
        let parent_dir = match config_path.parent() {
            Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
            Some(dir) => dir,
            None => bail!(
                "Configuration file has no parent directory: {}",
                config_path.display()
            ),
        };
        watcher
            .watch(parent_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", parent_dir.display()))?;
        info!(
            "Started watching configuration directory: {}",
            parent_dir.display()
        );

        Ok(Self {
            config_path,
            current_config,
            change_sender,
            _watcher: watcher,
        })
    }

    /// Get the last successfully loaded configuration
    pub fn get_config(&self) -> Arc<Config> {
        self.current_config.load_full()
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> BroadcastStream<ConfigChangeEvent> {
        BroadcastStream::new(self.change_sender.subscribe())
    }

    /// Force reload the configuration
    pub fn reload(&self) -> Result<Arc<Config>> {
        info!(
            "Force reloading configuration from: {}",
            self.config_path.display()
        );
        let config = Arc::new(ConfigManager::load_from_file(&self.config_path)?);
        Self::publish(&self.config_path, &self.current_config, &self.change_sender, config.clone());
        Ok(config)
    }

    fn publish(
        config_path: &Path,
        current_config: &ArcSwap<Config>,
        sender: &broadcast::Sender<ConfigChangeEvent>,
        config: Arc<Config>,
    ) {
        current_config.store(config.clone());
        let event = ConfigChangeEvent {
            config,
            timestamp: std::time::SystemTime::now(),
            file_path: config_path.to_path_buf(),
        };
        if sender.send(event).is_err() {
            warn!("No subscribers for config change event");
        }
    }

    /// Handle file system events
    fn handle_file_event(
        event: Event,
        config_path: &Path,
        current_config: &ArcSwap<Config>,
        sender: &broadcast::Sender<ConfigChangeEvent>,
    ) {
        debug!("File event: {:?}", event);

        let affects_config = event
            .paths
            .iter()
            .any(|path| path.file_name() == config_path.file_name());
        if !affects_config {
            return;
        }

        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                info!("Configuration file changed, reloading...");

                // Let the writer finish before reading
                std::thread::sleep(std::time::Duration::from_millis(100));

                match ConfigManager::load_from_file(config_path) {
                    Ok(new_config) => {
                        if *current_config.load_full() == new_config {
                            debug!("Configuration content unchanged, ignoring event");
                            return;
                        }
                        Self::publish(config_path, current_config, sender, Arc::new(new_config));
                        info!("Configuration change published");
                    }
                    Err(e) => {
                        error!(
                            "Failed to reload configuration, keeping current config: {:#}",
                            e
                        );
                    }
                }
            }
            EventKind::Remove(_) => {
                warn!("Configuration file was removed: {}", config_path.display());
            }
            _ => {
                debug!("Ignoring file event type: {:?}", event.kind);
            }
        }
    }
}
