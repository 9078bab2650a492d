//! Protocol Engine
//!
//! Turns inbound frames into replies. The lifecycle only talks to the
//! [`ProtocolEngine`] trait; [`LimboEngine`] is the built-in implementation.

use super::constants::*;
use super::status::StatusTemplate;
use super::types::*;
use crate::config::{JoinMessageConfig, ListenerConfig};
use crate::connection::ConnectionHandle;
use md5::{Digest, Md5};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// What the lifecycle should do after the queued replies are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlow {
    Continue,
    Close,
}

pub trait ProtocolEngine: Send {
    /// React to one inbound frame, queueing replies into `out`
    fn handle(
        &mut self,
        frame: &Frame,
        connection: &ConnectionHandle,
        out: &mut Vec<Frame>,
    ) -> EngineFlow;
}

/// Status for every client version, login and an empty world for protocol 47
pub struct LimboEngine {
    config: Arc<ListenerConfig>,
    status: Arc<StatusTemplate>,
}

impl LimboEngine {
    pub fn new(config: Arc<ListenerConfig>, status: Arc<StatusTemplate>) -> Self {
        Self { config, status }
    }

    fn login(&self, name: &str, connection: &ConnectionHandle, out: &mut Vec<Frame>) -> EngineFlow {
        let version = connection.protocol_version();
        if version != SUPPORTED_PROTOCOL {
            debug!(connection = %connection, version, "Refusing unsupported client version");
            let reason = if version < SUPPORTED_PROTOCOL {
                format!("Outdated client! Please use {}", SUPPORTED_VERSION_NAME)
            } else {
                format!("Outdated server! I'm still on {}", SUPPORTED_VERSION_NAME)
            };
            out.push(Frame::Disconnect(reason));
            return EngineFlow::Close;
        }

        let uuid = connection
            .forwarded_uuid()
            .unwrap_or_else(|| offline_uuid(name));
        let config = &self.config;

        out.push(Frame::LoginSuccess {
            uuid,
            name: name.to_string(),
        });
        out.push(Frame::JoinGame(JoinGame {
            entity_id: (connection.id().as_u64() & 0x7FFF_FFFF) as i32,
            gamemode: 2,
            dimension: config.world.dimension_id(),
            difficulty: 0,
            max_players: 1,
            level_type: "default".to_string(),
            reduced_debug_info: false,
        }));
        out.push(Frame::PluginMessage {
            channel: BRAND_CHANNEL.to_string(),
            data: brand_payload(&config.brand),
        });
        if config.disable_fall {
            out.push(Frame::PlayerAbilities {
                flags: ABILITY_INVULNERABLE | ABILITY_FLYING | ABILITY_ALLOW_FLYING,
                flying_speed: 0.0,
                walking_speed: 0.1,
            });
        }
        out.push(Frame::PositionAndLook(PositionAndLook {
            x: config.position.x,
            y: config.position.y,
            z: config.position.z,
            yaw: config.position.yaw,
            pitch: config.position.pitch,
        }));
        // The first keep-alive marks the session as joined
        out.push(Frame::KeepAlive(rand::random()));
        EngineFlow::Continue
    }
}

impl ProtocolEngine for LimboEngine {
    fn handle(
        &mut self,
        frame: &Frame,
        connection: &ConnectionHandle,
        out: &mut Vec<Frame>,
    ) -> EngineFlow {
        match frame {
            Frame::Handshake(handshake) => {
                connection.set_protocol_version(handshake.protocol_version);
                EngineFlow::Continue
            }
            Frame::StatusRequest => {
                out.push(Frame::StatusResponse(
                    self.status.render(connection.protocol_version()),
                ));
                EngineFlow::Continue
            }
            Frame::Ping(payload) => {
                out.push(Frame::Pong(*payload));
                EngineFlow::Close
            }
            Frame::LoginStart { name } => {
                connection.set_player_name(name.clone());
                self.login(name, connection, out)
            }
            Frame::KeepAlive(id) => {
                trace!(connection = %connection, id, "Keep-alive answered");
                EngineFlow::Continue
            }
            other => {
                trace!(connection = %connection, frame = other.name(), "Ignoring frame");
                EngineFlow::Continue
            }
        }
    }
}

/// Frames delivered once a session has joined
pub fn welcome_frames(message: &JoinMessageConfig) -> Vec<Frame> {
    let mut frames: Vec<Frame> = message
        .chat
        .iter()
        .map(|line| Frame::Chat {
            text: line.clone(),
            position: ChatPosition::Chat,
        })
        .collect();

    if !message.action_bar.is_empty() {
        frames.push(Frame::Chat {
            text: message.action_bar.clone(),
            position: ChatPosition::ActionBar,
        });
    }

    let title = &message.title;
    if title.is_enabled() {
        frames.push(Frame::Title(TitleAction::Times {
            fade_in: title.fade_in,
            stay: title.stay,
            fade_out: title.fade_out,
        }));
        frames.push(Frame::Title(TitleAction::Subtitle(title.sub_title.clone())));
        frames.push(Frame::Title(TitleAction::Title(title.title.clone())));
    }

    if !message.tab.header.is_empty() || !message.tab.footer.is_empty() {
        frames.push(Frame::TabList {
            header: message.tab.header.join("\n"),
            footer: message.tab.footer.join("\n"),
        });
    }

    frames
}

/// Offline-mode id: an MD5 name-based UUID of `OfflinePlayer:<name>` with no namespace
pub fn offline_uuid(name: &str) -> Uuid {
    let digest = Md5::digest(format!("OfflinePlayer:{}", name).as_bytes());
    uuid::Builder::from_md5_bytes(digest.into()).into_uuid()
}

fn brand_payload(brand: &str) -> Vec<u8> {
    let mut data = bytes::BytesMut::new();
    super::codec::write_varint(&mut data, brand.len() as i32);
    data.extend_from_slice(brand.as_bytes());
    data.to_vec()
}
