//! Limbo Gate - lightweight Minecraft limbo server
//!
//! Holds players in an empty world behind one or more named listeners.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use limbo_gate::{
    config::{ConfigChangeEvent, ConfigManager, ConfigWatcher},
    connection::ConnectionServices,
    console::{Console, ConsoleAction},
    events::Events,
    listener::{ManagerError, SHUTDOWN_REASON},
    Config, ListenerManager, ShutdownCoordinator, TrafficRegistry,
};

/// Exit code when no listener could be kept running
const EXIT_NO_LISTENERS: i32 = 2;

/// CLI arguments for Limbo Gate
#[derive(Parser, Debug)]
#[command(name = "limbo-gate")]
#[command(about = "Limbo Gate - lightweight Minecraft limbo server")]
#[command(version)]
#[command(long_about = "
Limbo Gate - lightweight Minecraft limbo server

Listeners, forwarding and join messages are configured in a TOML file.
A missing file is created with defaults on first start.

Console commands: stop, end, reload, status, help
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    /// Reload when the configuration file changes
    #[arg(short, long, help = "Watch the configuration file for changes")]
    pub watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting Limbo Gate v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigManager::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration: {}", args.config.display()))?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Shutdown timeout: {:?}", config.shutdown_timeout);
        for listener in &config.listeners {
            info!(
                "  Listener '{}': {} (forwarding: {}, keep-alive: {:?}, idle timeout: {:?})",
                listener.name,
                listener.endpoint(),
                listener.forward_mode,
                listener.keep_alive_interval,
                listener.idle_timeout
            );
        }
        return Ok(());
    }

    let code = run(&args, config).await?;
    info!("Server shutdown complete");
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: &CliArgs, config: Config) -> Result<i32> {
    let registry = Arc::new(TrafficRegistry::new());
    let events = Arc::new(Events::new());
    let services = ConnectionServices::new(registry.clone(), events.clone());
    let manager = Arc::new(ListenerManager::new(services, config.shutdown_timeout));
    let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));

    match manager.start(config.listeners.clone()).await {
        Ok(report) if !report.failed.is_empty() => {
            warn!("Listeners failed to bind: {}", report.failed.join(", "));
        }
        Ok(_) => {}
        Err(ManagerError::NoListeners) => {
            error!("No listener could be bound, exiting");
            return Ok(EXIT_NO_LISTENERS);
        }
        Err(e) => return Err(e.into()),
    }
    info!("Limbo Gate started with listeners: {}", manager.names().join(", "));
    info!("Press Ctrl+C, send SIGTERM/SIGINT or type \"stop\" to shutdown gracefully");

    let console = Console::new(
        args.config.clone(),
        manager.clone(),
        registry.clone(),
        events.clone(),
    );

    let watcher = if args.watch || config.watch {
        match ConfigWatcher::new(args.config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Configuration watching disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    let mut changes = watcher.as_ref().map(ConfigWatcher::subscribe);

    let mut shutdown_rx = coordinator.subscribe();
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.listen_for_signals().await {
                error!("Error setting up signal handlers: {}", e);
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let code = loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match console.execute(&line).await {
                        ConsoleAction::Continue => {}
                        ConsoleAction::Stop => break 0,
                        ConsoleAction::Fatal => break EXIT_NO_LISTENERS,
                    },
                    Ok(None) => {
                        info!("Console input closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        stdin_open = false;
                    }
                }
            }
            Some(change) = next_change(&mut changes) => {
                info!(
                    "Applying configuration change from {}",
                    change.file_path.display()
                );
                if console.apply(&change.config).await == ConsoleAction::Fatal {
                    break EXIT_NO_LISTENERS;
                }
            }
            _ = shutdown_rx.recv() => break 0,
        }
    };

    info!("Initiating graceful shutdown...");
    coordinator.shutdown_listeners(&manager, SHUTDOWN_REASON).await;
    Ok(code)
}

/// Next successfully delivered change; pending forever without a watcher
async fn next_change(
    changes: &mut Option<BroadcastStream<ConfigChangeEvent>>,
) -> Option<ConfigChangeEvent> {
    let Some(stream) = changes.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match stream.next().await? {
            Ok(change) => return Some(change),
            Err(e) => warn!("Missed configuration changes: {}", e),
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
