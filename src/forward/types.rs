//! Forwarding Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// How a listener recovers the real client identity from a relayed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Direct connections only; forwarded handshakes are refused
    #[default]
    None,
    /// BungeeCord IP forwarding
    Legacy,
    /// BungeeGuard token forwarding
    Guard,
    /// Velocity modern forwarding, passed through unverified
    Modern,
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForwardMode::None => "none",
            ForwardMode::Legacy => "legacy",
            ForwardMode::Guard => "guard",
            ForwardMode::Modern => "modern",
        };
        f.write_str(name)
    }
}

/// Host and port the client originally addressed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Outcome of evaluating a login handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardDecision {
    PassThrough,
    Rewrite {
        client: SocketAddr,
        destination: Destination,
        uuid: Option<Uuid>,
    },
    Reject(ForwardRejection),
}

/// Why a forwarded handshake was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardRejection {
    /// Forwarding data sent to a listener that does not accept it
    Unrelayed,
    /// LEGACY listener got a handshake without usable forwarding data
    LegacyMissing,
    /// GUARD listener got a handshake of the wrong shape
    GuardUnknown,
    /// GUARD token missing or not accepted
    GuardFailed,
}

impl ForwardRejection {
    /// Disconnect text shown to the client
    pub fn reason(self) -> &'static str {
        match self {
            ForwardRejection::Unrelayed => {
                "Forwarding data was found, but this server does not accept forwarded connections. Did you forget to enable forwarding?"
            }
            ForwardRejection::LegacyMissing => {
                "If you wish to use IP forwarding, please enable it in your BungeeCord config as well!"
            }
            ForwardRejection::GuardUnknown => {
                "Unable to authenticate - no data was forwarded by the proxy."
            }
            ForwardRejection::GuardFailed => "Unable to authenticate.",
        }
    }
}

impl fmt::Display for ForwardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}
