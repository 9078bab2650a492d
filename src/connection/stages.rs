//! Connection processing stages
//!
//! Each connection gets its own ordered [`StageChain`], built once by
//! [`StageChain::for_connection`]. A stage that is done asks to be marked
//! inert through its context and is skipped afterwards.

use super::{ConnectionHandle, ConnectionState};
use crate::config::ListenerConfig;
use crate::events::{ConnectEvent, DisconnectEvent, Events};
use crate::forward::{ForwardAuthenticator, ForwardDecision};
use crate::metrics::TrafficRegistry;
use crate::protocol::{Frame, NextState};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of running a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop processing; send the reason as a disconnect when one is given
    Close(Option<String>),
}

/// What a stage sees while one of its hooks runs
pub struct StageContext<'a> {
    pub connection: &'a Arc<ConnectionHandle>,
    pub config: &'a ListenerConfig,
    /// Frames to write after the current step
    pub outbound: &'a mut Vec<Frame>,
    inert: bool,
}

impl StageContext<'_> {
    /// Skip this stage from now on
    pub fn remove_self(&mut self) {
        self.inert = true;
    }
}

pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn on_active(&mut self, _ctx: &mut StageContext<'_>) -> Flow {
        Flow::Continue
    }

    fn on_inbound(&mut self, _ctx: &mut StageContext<'_>, _frame: &Frame) -> Flow {
        Flow::Continue
    }

    fn on_written(&mut self, _ctx: &mut StageContext<'_>, _frame: &Frame) {}

    fn on_inactive(&mut self, _ctx: &mut StageContext<'_>) {}
}

struct Slot {
    stage: Box<dyn Stage>,
    inert: bool,
}

pub struct StageChain {
    slots: Vec<Slot>,
}

impl StageChain {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            slots: stages
                .into_iter()
                .map(|stage| Slot { stage, inert: false })
                .collect(),
        }
    }

    /// Standard chain: traffic, forward, connect event, join detection, disconnect
    pub fn for_connection(
        forward: Arc<ForwardAuthenticator>,
        welcome: Vec<Frame>,
        registry: Arc<TrafficRegistry>,
        events: Arc<Events>,
    ) -> Self {
        Self::new(vec![
            Box::new(TrafficStage { registry }),
            Box::new(ForwardStage { authenticator: forward }),
            Box::new(ConnectEventStage {
                events: events.clone(),
            }),
            Box::new(JoinStage { welcome }),
            Box::new(DisconnectStage {
                events,
                fired: false,
            }),
        ])
    }

    /// Names of stages that are still live
    pub fn active_stages(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|slot| !slot.inert)
            .map(|slot| slot.stage.name())
            .collect()
    }

    pub fn fire_active(
        &mut self,
        connection: &Arc<ConnectionHandle>,
        config: &ListenerConfig,
        outbound: &mut Vec<Frame>,
    ) -> Flow {
        self.run(connection, config, outbound, |stage, ctx| stage.on_active(ctx))
    }

    pub fn fire_inbound(
        &mut self,
        connection: &Arc<ConnectionHandle>,
        config: &ListenerConfig,
        outbound: &mut Vec<Frame>,
        frame: &Frame,
    ) -> Flow {
        self.run(connection, config, outbound, |stage, ctx| stage.on_inbound(ctx, frame))
    }

    /// Post-write hooks; they may queue more frames but never close
    pub fn fire_written(
        &mut self,
        connection: &Arc<ConnectionHandle>,
        config: &ListenerConfig,
        outbound: &mut Vec<Frame>,
        frame: &Frame,
    ) {
        self.run(connection, config, outbound, |stage, ctx| {
            stage.on_written(ctx, frame);
            Flow::Continue
        });
    }

    /// Inactivation reaches every live stage regardless of earlier results
    pub fn fire_inactive(&mut self, connection: &Arc<ConnectionHandle>, config: &ListenerConfig) {
        let mut discarded = Vec::new();
        self.run(connection, config, &mut discarded, |stage, ctx| {
            stage.on_inactive(ctx);
            Flow::Continue
        });
    }

    fn run<F>(
        &mut self,
        connection: &Arc<ConnectionHandle>,
        config: &ListenerConfig,
        outbound: &mut Vec<Frame>,
        mut hook: F,
    ) -> Flow
    where
        F: FnMut(&mut dyn Stage, &mut StageContext<'_>) -> Flow,
    {
        for slot in self.slots.iter_mut().filter(|slot| !slot.inert) {
            let mut ctx = StageContext {
                connection,
                config,
                outbound: &mut *outbound,
                inert: false,
            };
            let flow = hook(slot.stage.as_mut(), &mut ctx);
            if ctx.inert {
                slot.inert = true;
            }
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }
}

/// Open-set registration
struct TrafficStage {
    registry: Arc<TrafficRegistry>,
}

impl Stage for TrafficStage {
    fn name(&self) -> &'static str {
        "traffic"
    }

    fn on_active(&mut self, ctx: &mut StageContext<'_>) -> Flow {
        self.registry.register(ctx.connection.clone());
        Flow::Continue
    }

    fn on_inactive(&mut self, ctx: &mut StageContext<'_>) {
        self.registry.unregister(ctx.connection.id());
    }
}

/// Evaluates the handshake once, then goes inert
struct ForwardStage {
    authenticator: Arc<ForwardAuthenticator>,
}

impl Stage for ForwardStage {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn on_inbound(&mut self, ctx: &mut StageContext<'_>, frame: &Frame) -> Flow {
        let Frame::Handshake(handshake) = frame else {
            return Flow::Continue;
        };
        ctx.remove_self();

        let connection = ctx.connection;
        connection.advance(ConnectionState::Authenticating);
        if handshake.next_state == NextState::Status {
            connection.advance(ConnectionState::Established);
            return Flow::Continue;
        }

        match self.authenticator.evaluate(handshake, connection.peer_addr()) {
            ForwardDecision::PassThrough => {
                connection.advance(ConnectionState::Established);
                Flow::Continue
            }
            ForwardDecision::Rewrite {
                client,
                destination,
                uuid,
            } => {
                debug!(
                    listener = %ctx.config.name,
                    peer = %connection.peer_addr(),
                    client = %client,
                    destination = %destination,
                    "Applying forwarded identity"
                );
                connection.apply_forwarding(client, destination, uuid);
                connection.advance(ConnectionState::Established);
                Flow::Continue
            }
            ForwardDecision::Reject(rejection) => {
                connection.advance(ConnectionState::Rejected);
                info!(
                    listener = %ctx.config.name,
                    mode = %self.authenticator.mode(),
                    "{} rejected: {}",
                    connection,
                    rejection
                );
                Flow::Close(Some(rejection.reason().to_string()))
            }
        }
    }
}

/// Dispatches the cancellable connect event on activation
struct ConnectEventStage {
    events: Arc<Events>,
}

impl Stage for ConnectEventStage {
    fn name(&self) -> &'static str {
        "connect_event"
    }

    fn on_active(&mut self, ctx: &mut StageContext<'_>) -> Flow {
        ctx.remove_self();
        let mut event = ConnectEvent::new(ctx.connection.clone());
        if self.events.connect.dispatch(&mut event) {
            Flow::Continue
        } else {
            debug!(listener = %ctx.config.name, "{} refused by connect subscriber", ctx.connection);
            Flow::Close(None)
        }
    }
}

/// Marks the session joined once the first keep-alive is on the wire
struct JoinStage {
    welcome: Vec<Frame>,
}

impl Stage for JoinStage {
    fn name(&self) -> &'static str {
        "join"
    }

    fn on_inbound(&mut self, ctx: &mut StageContext<'_>, frame: &Frame) -> Flow {
        if matches!(frame, Frame::StatusRequest) {
            info!(listener = %ctx.config.name, "{} has pinged", ctx.connection);
            ctx.remove_self();
        }
        Flow::Continue
    }

    fn on_written(&mut self, ctx: &mut StageContext<'_>, frame: &Frame) {
        if !matches!(frame, Frame::KeepAlive(_)) {
            return;
        }
        ctx.remove_self();
        if ctx.connection.mark_joined() {
            info!(listener = %ctx.config.name, "{} has joined", ctx.connection);
            ctx.outbound.append(&mut self.welcome);
        }
    }
}

/// Fires the disconnect event exactly once
struct DisconnectStage {
    events: Arc<Events>,
    fired: bool,
}

impl Stage for DisconnectStage {
    fn name(&self) -> &'static str {
        "disconnect"
    }

    fn on_inactive(&mut self, ctx: &mut StageContext<'_>) {
        if self.fired {
            return;
        }
        self.fired = true;
        if ctx.connection.is_joined() {
            info!(
                listener = %ctx.config.name,
                online = ?ctx.connection.age(),
                "{} has disconnected",
                ctx.connection
            );
        }
        let mut event = DisconnectEvent {
            connection: ctx.connection.clone(),
        };
        self.events.disconnect.dispatch(&mut event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::forward::ForwardMode;
    use crate::protocol::Handshake;

    struct Fixture {
        chain: StageChain,
        connection: Arc<ConnectionHandle>,
        config: ListenerConfig,
        registry: Arc<TrafficRegistry>,
        events: Arc<Events>,
    }

    fn fixture(mode: ForwardMode) -> Fixture {
        let registry = Arc::new(TrafficRegistry::new());
        let events = Arc::new(Events::new());
        let chain = StageChain::for_connection(
            Arc::new(ForwardAuthenticator::new(mode, Vec::new())),
            vec![Frame::Chat {
                text: "hi".into(),
                position: crate::protocol::ChatPosition::Chat,
            }],
            registry.clone(),
            events.clone(),
        );
        let connection = Arc::new(ConnectionHandle::new(
            registry.next_connection_id(),
            "main",
            "10.1.1.1:3000".parse().unwrap(),
        ));
        Fixture {
            chain,
            connection,
            config: ListenerConfig::default(),
            registry,
            events,
        }
    }

    fn login(host: &str) -> Frame {
        Frame::Handshake(Handshake {
            protocol_version: 47,
            host: host.into(),
            port: 25565,
            next_state: NextState::Login,
        })
    }

    #[test]
    fn activation_registers_and_inactivation_unregisters() {
        let mut f = fixture(ForwardMode::None);
        let mut out = Vec::new();
        assert_eq!(f.chain.fire_active(&f.connection, &f.config, &mut out), Flow::Continue);
        assert_eq!(f.registry.open_connections(), 1);

        f.chain.fire_inactive(&f.connection, &f.config);
        f.chain.fire_inactive(&f.connection, &f.config);
        assert_eq!(f.registry.open_connections(), 0);
    }

    #[test]
    fn forward_stage_goes_inert_after_handshake() {
        let mut f = fixture(ForwardMode::Legacy);
        let mut out = Vec::new();
        f.chain.fire_active(&f.connection, &f.config, &mut out);
        assert!(f.chain.active_stages().contains(&"forward"));
        assert!(!f.chain.active_stages().contains(&"connect_event"));

        let flow = f.chain.fire_inbound(&f.connection, &f.config, &mut out, &login("h\x009.9.9.9\0u"));
        assert_eq!(flow, Flow::Continue);
        assert!(!f.chain.active_stages().contains(&"forward"));
        assert_eq!(f.connection.client_addr(), "9.9.9.9:3000".parse().unwrap());
        assert_eq!(f.connection.state(), ConnectionState::Established);
    }

    #[test]
    fn rejected_handshake_closes_with_reason() {
        let mut f = fixture(ForwardMode::Legacy);
        let mut out = Vec::new();
        let flow = f.chain.fire_inbound(&f.connection, &f.config, &mut out, &login("plain-host"));
        assert_eq!(
            flow,
            Flow::Close(Some(crate::forward::ForwardRejection::LegacyMissing.reason().to_string()))
        );
        assert_eq!(f.connection.state(), ConnectionState::Rejected);
        assert_eq!(f.connection.client_addr(), f.connection.peer_addr());
    }

    #[test]
    fn cancelled_connect_event_closes() {
        let mut f = fixture(ForwardMode::None);
        f.events.connect.subscribe(|event| event.set_cancelled(true));
        let mut out = Vec::new();
        assert_eq!(f.chain.fire_active(&f.connection, &f.config, &mut out), Flow::Close(None));
    }

    #[test]
    fn first_written_keep_alive_joins_once() {
        let mut f = fixture(ForwardMode::None);
        let mut out = Vec::new();

        f.chain.fire_written(&f.connection, &f.config, &mut out, &Frame::Pong(1));
        assert!(!f.connection.is_joined());

        f.chain.fire_written(&f.connection, &f.config, &mut out, &Frame::KeepAlive(5));
        assert!(f.connection.is_joined());
        assert_eq!(out.len(), 1);

        f.chain.fire_written(&f.connection, &f.config, &mut out, &Frame::KeepAlive(6));
        assert_eq!(out.len(), 1);
        assert!(!f.chain.active_stages().contains(&"join"));
    }

    #[test]
    fn disconnect_event_fires_once() {
        let mut f = fixture(ForwardMode::None);
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        f.events.disconnect.subscribe(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        f.chain.fire_inactive(&f.connection, &f.config);
        f.chain.fire_inactive(&f.connection, &f.config);
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn ids_come_from_registry() {
        let f = fixture(ForwardMode::None);
        assert_eq!(f.connection.id(), ConnectionId::new(1));
    }
}
