//! Operator Console
//!
//! Commands read line by line from stdin.

use crate::config::{Config, ConfigManager};
use crate::events::{ConsoleInputEvent, Events};
use crate::listener::{ListenerManager, ManagerError};
use crate::metrics::TrafficRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    Reload,
    Status,
    Help,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    /// Case-insensitive; surrounding whitespace is ignored
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "stop" | "end" => Self::Stop,
            "reload" => Self::Reload,
            "status" => Self::Status,
            "help" => Self::Help,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    Stop,
    /// No listener is left running; exit with a failure code
    Fatal,
}

pub struct Console {
    config_path: PathBuf,
    manager: Arc<ListenerManager>,
    registry: Arc<TrafficRegistry>,
    events: Arc<Events>,
}

impl Console {
    pub fn new(
        config_path: PathBuf,
        manager: Arc<ListenerManager>,
        registry: Arc<TrafficRegistry>,
        events: Arc<Events>,
    ) -> Self {
        Self {
            config_path,
            manager,
            registry,
            events,
        }
    }

    pub async fn execute(&self, line: &str) -> ConsoleAction {
        let mut event = ConsoleInputEvent::new(line);
        if !self.events.console_input.dispatch(&mut event) {
            debug!(input = %line, "Console input cancelled by a subscriber");
            return ConsoleAction::Continue;
        }

        match ConsoleCommand::parse(&event.input) {
            ConsoleCommand::Empty => ConsoleAction::Continue,
            ConsoleCommand::Stop => ConsoleAction::Stop,
            ConsoleCommand::Status => {
                info!("{}", self.registry.status());
                ConsoleAction::Continue
            }
            ConsoleCommand::Help => {
                info!("Available commands:");
                info!("  stop, end  - shut the server down");
                info!("  reload     - reload the configuration file");
                info!("  status     - show connection and traffic totals");
                info!("  help       - show this list");
                ConsoleAction::Continue
            }
            ConsoleCommand::Reload => {
                info!("Reloading configuration from {}", self.config_path.display());
                match ConfigManager::load_from_file(&self.config_path) {
                    Ok(config) => self.apply(&config).await,
                    Err(e) => {
                        error!("Failed to reload configuration: {:#}", e);
                        ConsoleAction::Continue
                    }
                }
            }
            ConsoleCommand::Unknown(command) => {
                warn!("Unknown command \"{}\". Type \"help\" for help.", command);
                ConsoleAction::Continue
            }
        }
    }

    /// Reconcile the listener set with a freshly loaded configuration
    pub async fn apply(&self, config: &Config) -> ConsoleAction {
        match self.manager.reload(config.listeners.clone()).await {
            Ok(report) => {
                info!(
                    "Configuration reloaded: {} added, {} updated, {} removed, {} failed",
                    report.added.len(),
                    report.updated.len(),
                    report.removed.len(),
                    report.failed.len()
                );
                ConsoleAction::Continue
            }
            Err(ManagerError::NoListeners) => {
                error!("No listener is running after reload");
                ConsoleAction::Fatal
            }
            Err(e) => {
                error!("Failed to reload listeners: {}", e);
                ConsoleAction::Continue
            }
        }
    }
}
