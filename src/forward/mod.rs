//! Forwarding Module
//!
//! Recovers the real client address from handshakes relayed by a proxy.

pub mod authenticator;
pub mod types;

pub use authenticator::ForwardAuthenticator;
pub use types::*;
