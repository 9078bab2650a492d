//! Keep-alive scheduling
//!
//! The ticker lives inside the connection task and is polled from its
//! select loop, so probes are always written from the task that owns
//! the socket.

use super::ConnectionHandle;
use crate::protocol::Frame;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveState {
    Idle,
    Scheduled,
    Cancelled,
}

#[derive(Debug)]
pub struct KeepAliveScheduler {
    period: Duration,
    state: KeepAliveState,
    ticker: Option<Interval>,
}

impl KeepAliveScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            state: KeepAliveState::Idle,
            ticker: None,
        }
    }

    pub fn state(&self) -> KeepAliveState {
        self.state
    }

    /// Whether a repeating probe is currently armed
    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    /// Called after every written frame. The first keep-alive arms the
    /// ticker; returns true when this call did so.
    pub fn observe_written(&mut self, frame: &Frame) -> bool {
        if self.state != KeepAliveState::Idle || !matches!(frame, Frame::KeepAlive(_)) {
            return false;
        }
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.state = KeepAliveState::Scheduled;
        true
    }

    /// Wait for the next probe. Pending forever while nothing is scheduled.
    ///
    /// Yields `None` (and cancels itself) once the connection is closing.
    pub async fn next_probe(&mut self, connection: &ConnectionHandle) -> Option<Frame> {
        let Some(ticker) = self.ticker.as_mut() else {
            return std::future::pending().await;
        };
        ticker.tick().await;

        if connection.is_closing() {
            trace!(connection = %connection, "Keep-alive stopped, connection closing");
            self.cancel();
            return None;
        }
        Some(Frame::KeepAlive(rand::random()))
    }

    /// Stop probing. Safe to call any number of times.
    pub fn cancel(&mut self) {
        self.ticker = None;
        self.state = KeepAliveState::Cancelled;
    }
}
