//! Connection Module
//!
//! Per-connection state, the stage chain and the task that drives a
//! connection from accept to teardown.

pub mod keepalive;
pub mod lifecycle;
pub mod stages;
pub mod types;

pub use keepalive::{KeepAliveScheduler, KeepAliveState};
pub use lifecycle::{ConnectionLifecycle, ConnectionServices, IDLE_TIMEOUT_REASON};
pub use stages::{Flow, Stage, StageChain, StageContext};
pub use types::{ConnectionHandle, ConnectionId, ConnectionState};
