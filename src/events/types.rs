//! Event Types

use super::Event;
use crate::connection::ConnectionHandle;
use std::net::SocketAddr;
use std::sync::Arc;

/// Fired when a connection becomes active, before any frame is read.
/// Cancelling closes the connection.
#[derive(Debug)]
pub struct ConnectEvent {
    pub connection: Arc<ConnectionHandle>,
    cancelled: bool,
}

impl ConnectEvent {
    pub fn new(connection: Arc<ConnectionHandle>) -> Self {
        Self {
            connection,
            cancelled: false,
        }
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

impl Event for ConnectEvent {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Fired exactly once per connection when it goes inactive
#[derive(Debug)]
pub struct DisconnectEvent {
    pub connection: Arc<ConnectionHandle>,
}

impl Event for DisconnectEvent {}

/// Fired when a listener is bound or its configuration refreshed
#[derive(Debug, Clone)]
pub struct ListenerAddEvent {
    pub name: String,
    pub local_addr: SocketAddr,
}

impl Event for ListenerAddEvent {}

/// Fired after a listener has been closed and dropped by a reload
#[derive(Debug, Clone)]
pub struct ListenerRemoveEvent {
    pub name: String,
}

impl Event for ListenerRemoveEvent {}

/// Fired for every console line before it is interpreted as a command
#[derive(Debug)]
pub struct ConsoleInputEvent {
    pub input: String,
    cancelled: bool,
}

impl ConsoleInputEvent {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            cancelled: false,
        }
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

impl Event for ConsoleInputEvent {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
