//! Protocol Constants

/// Protocol version of the 1.8.x client family spoken by the built-in engine
pub const SUPPORTED_PROTOCOL: i32 = 47;
pub const SUPPORTED_VERSION_NAME: &str = "1.8.x";

/// Upper bound for a single frame body
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;
/// Longest string (in chars) the codec accepts
pub const MAX_STRING_LEN: usize = 32767;
pub const MAX_PLAYER_NAME_LEN: usize = 16;

/// First byte of a pre-netty server list ping
pub const LEGACY_PING_ID: u8 = 0xFE;

// Handshaking, serverbound
pub const HANDSHAKE_ID: i32 = 0x00;

pub const NEXT_STATE_STATUS: i32 = 1;
pub const NEXT_STATE_LOGIN: i32 = 2;
pub const NEXT_STATE_TRANSFER: i32 = 3;

// Status
pub const STATUS_REQUEST_ID: i32 = 0x00;
pub const STATUS_PING_ID: i32 = 0x01;
pub const STATUS_RESPONSE_ID: i32 = 0x00;
pub const STATUS_PONG_ID: i32 = 0x01;

// Login
pub const LOGIN_START_ID: i32 = 0x00;
pub const LOGIN_DISCONNECT_ID: i32 = 0x00;
pub const LOGIN_SUCCESS_ID: i32 = 0x02;

// Play (protocol 47)
pub const PLAY_KEEP_ALIVE_SERVERBOUND_ID: i32 = 0x00;
pub const PLAY_KEEP_ALIVE_ID: i32 = 0x00;
pub const PLAY_JOIN_GAME_ID: i32 = 0x01;
pub const PLAY_CHAT_ID: i32 = 0x02;
pub const PLAY_POSITION_AND_LOOK_ID: i32 = 0x08;
pub const PLAY_ABILITIES_ID: i32 = 0x39;
pub const PLAY_PLUGIN_MESSAGE_ID: i32 = 0x3F;
pub const PLAY_DISCONNECT_ID: i32 = 0x40;
pub const PLAY_TITLE_ID: i32 = 0x45;
pub const PLAY_TAB_LIST_ID: i32 = 0x47;

pub const BRAND_CHANNEL: &str = "MC|Brand";

// Ability flags
pub const ABILITY_INVULNERABLE: u8 = 0x01;
pub const ABILITY_FLYING: u8 = 0x02;
pub const ABILITY_ALLOW_FLYING: u8 = 0x04;
