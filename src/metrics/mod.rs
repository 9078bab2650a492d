//! Metrics Module
//!
//! Global traffic accounting and the open-connection set.

pub mod collector;
pub mod types;

pub use collector::TrafficRegistry;
pub use types::{format_bytes, TrafficStatus};
