//! Frame Codec
//!
//! VarInt length-prefixed framing plus the packet layouts the built-in
//! engine needs. The codec tracks the protocol state itself: decoding a
//! handshake moves it to Status/Login, encoding a login success moves it
//! to Play.

use super::constants::*;
use super::types::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("varint is longer than 5 bytes")]
    VarIntTooLong,
    #[error("malformed {0} frame")]
    Malformed(&'static str),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("legacy server list ping is not supported")]
    LegacyPing,
    #[error("cannot encode {frame} in {state} state")]
    NotEncodable {
        frame: &'static str,
        state: ProtocolState,
    },
}

/// Stateful encoder/decoder for one connection
#[derive(Debug)]
pub struct FrameCodec {
    state: ProtocolState,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Handshaking,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Whether a `Disconnect` frame can be delivered in the current state
    pub fn can_disconnect(&self) -> bool {
        matches!(self.state, ProtocolState::Login | ProtocolState::Play)
    }

    /// Take one complete frame off `src`, or `None` if more bytes are needed
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if self.state == ProtocolState::Handshaking && src.first() == Some(&LEGACY_PING_ID) {
            return Err(CodecError::LegacyPing);
        }

        let Some((len, header)) = peek_varint(&src[..])? else {
            return Ok(None);
        };
        if len < 0 || len as usize > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(len.unsigned_abs() as usize));
        }
        let len = len as usize;
        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }

        src.advance(header);
        let mut body = src.split_to(len).freeze();
        let id = read_varint(&mut body)?;

        let frame = match (self.state, id) {
            (ProtocolState::Handshaking, HANDSHAKE_ID) => {
                let handshake = decode_handshake(&mut body)?;
                self.state = match handshake.next_state {
                    NextState::Status => ProtocolState::Status,
                    NextState::Login => ProtocolState::Login,
                };
                Frame::Handshake(handshake)
            }
            (ProtocolState::Handshaking, _) => return Err(CodecError::Malformed("handshake")),
            (ProtocolState::Status, STATUS_REQUEST_ID) => Frame::StatusRequest,
            (ProtocolState::Status, STATUS_PING_ID) => {
                if body.remaining() < 8 {
                    return Err(CodecError::Malformed("ping"));
                }
                Frame::Ping(body.get_i64())
            }
            (ProtocolState::Login, LOGIN_START_ID) => Frame::LoginStart {
                name: read_string(&mut body, MAX_PLAYER_NAME_LEN)?,
            },
            (ProtocolState::Play, PLAY_KEEP_ALIVE_SERVERBOUND_ID) => {
                Frame::KeepAlive(read_varint(&mut body)?)
            }
            (_, id) => Frame::Unknown { id, payload: body },
        };

        Ok(Some(frame))
    }

    /// Append the wire form of `frame` to `dst`
    pub fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        match (self.state, frame) {
            (ProtocolState::Status, Frame::StatusResponse(json)) => {
                write_varint(&mut body, STATUS_RESPONSE_ID);
                write_string(&mut body, json);
            }
            (ProtocolState::Status, Frame::Pong(payload)) => {
                write_varint(&mut body, STATUS_PONG_ID);
                body.put_i64(*payload);
            }
            (ProtocolState::Login, Frame::Disconnect(reason)) => {
                write_varint(&mut body, LOGIN_DISCONNECT_ID);
                write_string(&mut body, &text_component(reason));
            }
            (ProtocolState::Login, Frame::LoginSuccess { uuid, name }) => {
                write_varint(&mut body, LOGIN_SUCCESS_ID);
                write_string(&mut body, &uuid.hyphenated().to_string());
                write_string(&mut body, name);
            }
            (ProtocolState::Play, Frame::KeepAlive(id)) => {
                write_varint(&mut body, PLAY_KEEP_ALIVE_ID);
                write_varint(&mut body, *id);
            }
            (ProtocolState::Play, Frame::JoinGame(join)) => {
                write_varint(&mut body, PLAY_JOIN_GAME_ID);
                body.put_i32(join.entity_id);
                body.put_u8(join.gamemode);
                body.put_i8(join.dimension);
                body.put_u8(join.difficulty);
                body.put_u8(join.max_players);
                write_string(&mut body, &join.level_type);
                body.put_u8(join.reduced_debug_info as u8);
            }
            (ProtocolState::Play, Frame::Chat { text, position }) => {
                write_varint(&mut body, PLAY_CHAT_ID);
                write_string(&mut body, &text_component(text));
                body.put_u8(*position as u8);
            }
            (ProtocolState::Play, Frame::PositionAndLook(position)) => {
                write_varint(&mut body, PLAY_POSITION_AND_LOOK_ID);
                body.put_f64(position.x);
                body.put_f64(position.y);
                body.put_f64(position.z);
                body.put_f32(position.yaw);
                body.put_f32(position.pitch);
                body.put_u8(0);
            }
            (ProtocolState::Play, Frame::PlayerAbilities { flags, flying_speed, walking_speed }) => {
                write_varint(&mut body, PLAY_ABILITIES_ID);
                body.put_u8(*flags);
                body.put_f32(*flying_speed);
                body.put_f32(*walking_speed);
            }
            (ProtocolState::Play, Frame::PluginMessage { channel, data }) => {
                write_varint(&mut body, PLAY_PLUGIN_MESSAGE_ID);
                write_string(&mut body, channel);
                body.put_slice(data);
            }
            (ProtocolState::Play, Frame::Disconnect(reason)) => {
                write_varint(&mut body, PLAY_DISCONNECT_ID);
                write_string(&mut body, &text_component(reason));
            }
            (ProtocolState::Play, Frame::Title(action)) => {
                write_varint(&mut body, PLAY_TITLE_ID);
                match action {
                    TitleAction::Title(text) => {
                        write_varint(&mut body, 0);
                        write_string(&mut body, &text_component(text));
                    }
                    TitleAction::Subtitle(text) => {
                        write_varint(&mut body, 1);
                        write_string(&mut body, &text_component(text));
                    }
                    TitleAction::Times { fade_in, stay, fade_out } => {
                        write_varint(&mut body, 2);
                        body.put_i32(*fade_in);
                        body.put_i32(*stay);
                        body.put_i32(*fade_out);
                    }
                }
            }
            (ProtocolState::Play, Frame::TabList { header, footer }) => {
                write_varint(&mut body, PLAY_TAB_LIST_ID);
                write_string(&mut body, &text_component(header));
                write_string(&mut body, &text_component(footer));
            }
            _ => {
                return Err(CodecError::NotEncodable {
                    frame: frame.name(),
                    state: self.state,
                })
            }
        }

        write_varint(dst, body.len() as i32);
        dst.extend_from_slice(&body);

        if matches!(frame, Frame::LoginSuccess { .. }) {
            self.state = ProtocolState::Play;
        }
        Ok(())
    }
}

/// Wrap plain text as a JSON text component
pub fn text_component(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

fn decode_handshake(body: &mut Bytes) -> Result<Handshake, CodecError> {
    let protocol_version = read_varint(body)?;
    let host = read_string(body, MAX_STRING_LEN)?;
    if body.remaining() < 2 {
        return Err(CodecError::Malformed("handshake"));
    }
    let port = body.get_u16();
    let next_state = match read_varint(body)? {
        NEXT_STATE_STATUS => NextState::Status,
        NEXT_STATE_LOGIN | NEXT_STATE_TRANSFER => NextState::Login,
        _ => return Err(CodecError::Malformed("handshake")),
    };

    Ok(Handshake {
        protocol_version,
        host,
        port,
        next_state,
    })
}

/// Read a length prefix without consuming it: `(value, header_len)`
fn peek_varint(src: &[u8]) -> Result<Option<(i32, usize)>, CodecError> {
    let mut value: u32 = 0;
    for (i, byte) in src.iter().take(5).enumerate() {
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if src.len() >= 5 {
        Err(CodecError::VarIntTooLong)
    } else {
        Ok(None)
    }
}

pub fn read_varint(buf: &mut impl Buf) -> Result<i32, CodecError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        if !buf.has_remaining() {
            return Err(CodecError::Malformed("varint"));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(CodecError::VarIntTooLong)
}

pub fn write_varint(dst: &mut impl BufMut, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            dst.put_u8(value as u8);
            return;
        }
        dst.put_u8(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

fn read_string(buf: &mut Bytes, max_chars: usize) -> Result<String, CodecError> {
    let len = read_varint(buf)?;
    if len < 0 || len as usize > max_chars * 4 || buf.remaining() < len as usize {
        return Err(CodecError::Malformed("string"));
    }
    let raw = buf.split_to(len as usize);
    let text = String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
    if text.chars().count() > max_chars {
        return Err(CodecError::Malformed("string"));
    }
    Ok(text)
}

fn write_string(dst: &mut BytesMut, value: &str) {
    write_varint(dst, value.len() as i32);
    dst.put_slice(value.as_bytes());
}
