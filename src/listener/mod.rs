//! Listener Module
//!
//! Bound endpoints and the named set that reload reconciles.

#[allow(clippy::module_inception)]
pub mod listener;
pub mod manager;
pub mod snapshot;

pub use listener::{Listener, ListenerError, LISTENER_CLOSED_REASON};
pub use manager::{ListenerManager, ManagerError, ReloadReport, SHUTDOWN_REASON};
pub use snapshot::ListenerSnapshot;
