//! Forwarding Authenticator
//!
//! Decides, per login handshake, whether the address field carries
//! acceptable forwarding data and what the real client identity is.

use super::{Destination, ForwardDecision, ForwardMode, ForwardRejection};
use crate::protocol::{Handshake, NextState};
use serde_json::Value;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

const GUARD_TOKEN_PROPERTY: &str = "bungeeguard-token";
const FORGE_MARKERS: [&str; 3] = ["\0FML\0", "\0FML2\0", "\0FML3\0"];
const MAX_DIRECT_HOST_LEN: usize = 255;

/// Stateless forwarding policy of one listener snapshot
#[derive(Debug, Clone)]
pub struct ForwardAuthenticator {
    mode: ForwardMode,
    secrets: HashSet<String>,
}

impl ForwardAuthenticator {
    pub fn new(mode: ForwardMode, secrets: impl IntoIterator<Item = String>) -> Self {
        Self {
            mode,
            secrets: secrets.into_iter().collect(),
        }
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    /// Evaluate a handshake received from `peer`.
    ///
    /// Status handshakes always pass through; only logins are inspected.
    pub fn evaluate(&self, handshake: &Handshake, peer: SocketAddr) -> ForwardDecision {
        if handshake.next_state != NextState::Login {
            return ForwardDecision::PassThrough;
        }

        match self.mode {
            ForwardMode::None => Self::evaluate_direct(&handshake.host),
            ForwardMode::Legacy => Self::evaluate_legacy(handshake, peer),
            ForwardMode::Guard => self.evaluate_guard(handshake, peer),
            ForwardMode::Modern => ForwardDecision::PassThrough,
        }
    }

    fn evaluate_direct(host: &str) -> ForwardDecision {
        let bare = FORGE_MARKERS
            .iter()
            .find_map(|marker| host.strip_suffix(marker))
            .unwrap_or(host);
        let len = bare.chars().count();

        if len == 0 || len > MAX_DIRECT_HOST_LEN || bare.contains('\0') {
            ForwardDecision::Reject(ForwardRejection::Unrelayed)
        } else {
            ForwardDecision::PassThrough
        }
    }

    fn evaluate_legacy(handshake: &Handshake, peer: SocketAddr) -> ForwardDecision {
        let fields: Vec<&str> = handshake
            .host
            .split('\0')
            .filter(|field| !field.trim().is_empty())
            .collect();
        if fields.len() < 3 {
            return ForwardDecision::Reject(ForwardRejection::LegacyMissing);
        }

        rewrite(&fields, handshake.port, peer)
            .unwrap_or(ForwardDecision::Reject(ForwardRejection::LegacyMissing))
    }

    fn evaluate_guard(&self, handshake: &Handshake, peer: SocketAddr) -> ForwardDecision {
        let fields: Vec<&str> = handshake.host.split('\0').collect();
        if fields.len() != 4 {
            return ForwardDecision::Reject(ForwardRejection::GuardUnknown);
        }

        match guard_token(fields[3]) {
            Some(token) if self.secrets.contains(token.as_str()) => {
                rewrite(&fields, handshake.port, peer)
                    .unwrap_or(ForwardDecision::Reject(ForwardRejection::GuardUnknown))
            }
            _ => ForwardDecision::Reject(ForwardRejection::GuardFailed),
        }
    }
}

/// Build the rewrite for `[realHost, clientIp, uuid, ..]`; `None` if the ip is unusable
fn rewrite(fields: &[&str], port: u16, peer: SocketAddr) -> Option<ForwardDecision> {
    let ip: IpAddr = fields.get(1)?.trim().parse().ok()?;
    let uuid = fields.get(2).and_then(|raw| Uuid::try_parse(raw.trim()).ok());

    Some(ForwardDecision::Rewrite {
        client: SocketAddr::new(ip, peer.port()),
        destination: Destination {
            host: fields[0].to_string(),
            port,
        },
        uuid,
    })
}

/// The single `bungeeguard-token` property value, if the payload has exactly one
fn guard_token(properties: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(properties).ok()?;
    let mut tokens = parsed.as_array()?.iter().filter_map(|property| {
        let name = property.get("name")?.as_str()?;
        if name != GUARD_TOKEN_PROPERTY {
            return None;
        }
        property.get("value")?.as_str().map(str::to_string)
    });

    let token = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(host: &str) -> Handshake {
        Handshake {
            protocol_version: 47,
            host: host.to_string(),
            port: 25565,
            next_state: NextState::Login,
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    fn guard(secrets: &[&str]) -> ForwardAuthenticator {
        ForwardAuthenticator::new(
            ForwardMode::Guard,
            secrets.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn direct_accepts_plain_and_forge_hosts() {
        let auth = ForwardAuthenticator::new(ForwardMode::None, Vec::new());
        assert_eq!(auth.evaluate(&login("play.example.net"), peer()), ForwardDecision::PassThrough);
        assert_eq!(auth.evaluate(&login("play.example.net\0FML2\0"), peer()), ForwardDecision::PassThrough);
    }

    #[test]
    fn direct_rejects_forwarded_hosts() {
        let auth = ForwardAuthenticator::new(ForwardMode::None, Vec::new());
        let decision = auth.evaluate(&login("host\01.2.3.4\0uuid"), peer());
        assert_eq!(decision, ForwardDecision::Reject(ForwardRejection::Unrelayed));

        let long = "a".repeat(256);
        assert_eq!(
            auth.evaluate(&login(&long), peer()),
            ForwardDecision::Reject(ForwardRejection::Unrelayed)
        );
    }

    #[test]
    fn status_handshake_is_never_inspected() {
        let auth = ForwardAuthenticator::new(ForwardMode::None, Vec::new());
        let mut handshake = login("host\01.2.3.4\0uuid");
        handshake.next_state = NextState::Status;
        assert_eq!(auth.evaluate(&handshake, peer()), ForwardDecision::PassThrough);
    }

    #[test]
    fn legacy_rewrites_client_and_destination() {
        let auth = ForwardAuthenticator::new(ForwardMode::Legacy, Vec::new());
        let decision = auth.evaluate(
            &login("real.example.net\0203.0.113.9\0069a79f444e94726a5befca90e38aaf5"),
            peer(),
        );
        match decision {
            ForwardDecision::Rewrite { client, destination, uuid } => {
                assert_eq!(client, "203.0.113.9:40000".parse().unwrap());
                assert_eq!(destination.host, "real.example.net");
                assert_eq!(destination.port, 25565);
                assert_eq!(
                    uuid,
                    Some(Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap())
                );
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn legacy_ignores_blank_fields() {
        let auth = ForwardAuthenticator::new(ForwardMode::Legacy, Vec::new());
        let decision = auth.evaluate(&login("host\0\0 \x001.2.3.4\0abc"), peer());
        assert!(matches!(decision, ForwardDecision::Rewrite { .. }));
    }

    #[test]
    fn legacy_rejects_short_or_bad_payloads() {
        let auth = ForwardAuthenticator::new(ForwardMode::Legacy, Vec::new());
        let expected = ForwardDecision::Reject(ForwardRejection::LegacyMissing);
        assert_eq!(auth.evaluate(&login("host"), peer()), expected);
        assert_eq!(auth.evaluate(&login("host\01.2.3.4"), peer()), expected);
        assert_eq!(auth.evaluate(&login("host\0not-an-ip\0uuid"), peer()), expected);
    }

    #[test]
    fn guard_accepts_known_token() {
        let auth = guard(&["alpha", "beta"]);
        let host = r#"host.net 1.2.3.4 069a79f444e94726a5befca90e38aaf5 [{"name":"bungeeguard-token","value":"beta"}]"#
            .replace(' ', "\0");
        match auth.evaluate(&login(&host), peer()) {
            ForwardDecision::Rewrite { client, destination, .. } => {
                assert_eq!(client.ip(), "1.2.3.4".parse::<IpAddr>().unwrap());
                assert_eq!(destination.host, "host.net");
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn guard_rejects_wrong_or_missing_token_as_failed() {
        let auth = guard(&["alpha"]);
        let expected = ForwardDecision::Reject(ForwardRejection::GuardFailed);

        let wrong = "h\x001.2.3.4\0u\0[{\"name\":\"bungeeguard-token\",\"value\":\"nope\"}]";
        assert_eq!(auth.evaluate(&login(wrong), peer()), expected);

        let absent = "h\x001.2.3.4\0u\0[{\"name\":\"textures\",\"value\":\"x\"}]";
        assert_eq!(auth.evaluate(&login(absent), peer()), expected);

        let not_json = "h\x001.2.3.4\0u\0{broken";
        assert_eq!(auth.evaluate(&login(not_json), peer()), expected);

        let doubled = "h\x001.2.3.4\0u\0[{\"name\":\"bungeeguard-token\",\"value\":\"alpha\"},{\"name\":\"bungeeguard-token\",\"value\":\"alpha\"}]";
        assert_eq!(auth.evaluate(&login(doubled), peer()), expected);
    }

    #[test]
    fn guard_rejects_wrong_shape_as_unknown() {
        let auth = guard(&["alpha"]);
        let expected = ForwardDecision::Reject(ForwardRejection::GuardUnknown);
        assert_eq!(auth.evaluate(&login("host"), peer()), expected);
        assert_eq!(auth.evaluate(&login("h\x001.2.3.4\0u"), peer()), expected);
    }

    #[test]
    fn modern_passes_through() {
        let auth = ForwardAuthenticator::new(ForwardMode::Modern, Vec::new());
        assert_eq!(auth.evaluate(&login("anything\0at\0all"), peer()), ForwardDecision::PassThrough);
    }
}
