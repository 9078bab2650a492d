//! Protocol Types

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Codec state; selects how frame ids are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Handshaking,
    Status,
    Login,
    Play,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Handshaking => "handshaking",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Play => "play",
        };
        f.write_str(name)
    }
}

/// State requested by the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

/// First frame a client sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    /// Address the client believes it connected to; carries forwarding data when relayed
    pub host: String,
    pub port: u16,
    pub next_state: NextState,
}

/// Chat box slot for a chat frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPosition {
    Chat = 0,
    System = 1,
    ActionBar = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TitleAction {
    Title(String),
    Subtitle(String),
    Times { fade_in: i32, stay: i32, fade_out: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGame {
    pub entity_id: i32,
    pub gamemode: u8,
    pub dimension: i8,
    pub difficulty: u8,
    pub max_players: u8,
    pub level_type: String,
    pub reduced_debug_info: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionAndLook {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// Decoded or to-be-encoded protocol frame.
///
/// Text carried by `Disconnect`, `Chat`, `Title` and `TabList` is plain and
/// wrapped into a text component by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Handshake(Handshake),
    StatusRequest,
    StatusResponse(String),
    Ping(i64),
    Pong(i64),
    LoginStart { name: String },
    LoginSuccess { uuid: Uuid, name: String },
    JoinGame(JoinGame),
    PositionAndLook(PositionAndLook),
    PlayerAbilities { flags: u8, flying_speed: f32, walking_speed: f32 },
    PluginMessage { channel: String, data: Vec<u8> },
    KeepAlive(i32),
    Chat { text: String, position: ChatPosition },
    Title(TitleAction),
    TabList { header: String, footer: String },
    Disconnect(String),
    Unknown { id: i32, payload: Bytes },
}

impl Frame {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Handshake(_) => "handshake",
            Frame::StatusRequest => "status_request",
            Frame::StatusResponse(_) => "status_response",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::LoginStart { .. } => "login_start",
            Frame::LoginSuccess { .. } => "login_success",
            Frame::JoinGame(_) => "join_game",
            Frame::PositionAndLook(_) => "position_and_look",
            Frame::PlayerAbilities { .. } => "player_abilities",
            Frame::PluginMessage { .. } => "plugin_message",
            Frame::KeepAlive(_) => "keep_alive",
            Frame::Chat { .. } => "chat",
            Frame::Title(_) => "title",
            Frame::TabList { .. } => "tab_list",
            Frame::Disconnect(_) => "disconnect",
            Frame::Unknown { .. } => "unknown",
        }
    }
}
