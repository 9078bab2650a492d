//! Limbo Gate Library
//!
//! A lightweight Minecraft limbo server: named listeners that hold players
//! in an empty world, with proxy forwarding checks, hot reload and traffic
//! accounting.

pub mod config;
pub mod connection;
pub mod console;
pub mod events;
pub mod forward;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod shutdown;

pub use config::Config;
pub use listener::ListenerManager;
pub use metrics::TrafficRegistry;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the server
pub type Result<T> = anyhow::Result<T>;
