//! Events Module
//!
//! Synchronous, cancellable event dispatch for connection, listener and
//! console activity.

pub mod bus;
pub mod types;

pub use bus::{Event, EventBus, SubscriptionId};
pub use types::*;

/// One bus per event type, shared by every component
#[derive(Default)]
pub struct Events {
    pub connect: EventBus<ConnectEvent>,
    pub disconnect: EventBus<DisconnectEvent>,
    pub listener_add: EventBus<ListenerAddEvent>,
    pub listener_remove: EventBus<ListenerRemoveEvent>,
    pub console_input: EventBus<ConsoleInputEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }
}
