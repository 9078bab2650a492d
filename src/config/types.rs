//! Configuration Types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::forward::ForwardMode;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound for draining connections on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Reload automatically when the config file changes on disk
    pub watch: bool,
    pub listeners: Vec<ListenerConfig>,
}

/// One named listener. Compared by `name` across reloads.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Must be unique within one configuration
    pub name: String,
    pub bind_address: IpAddr,
    pub port: u16,
    pub debug: bool,
    pub forward_mode: ForwardMode,
    /// GUARD: accepted tokens, either `"a|b"` or `["a", "b"]`
    pub forward_secret: ForwardSecret,
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    pub brand: String,
    pub world: World,
    pub disable_fall: bool,
    pub position: PositionConfig,
    pub motd: MotdConfig,
    pub message: JoinMessageConfig,
}

impl ListenerConfig {
    /// Socket address this listener binds to
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Forwarding secret(s) accepted by a listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ForwardSecret {
    Joined(String),
    List(Vec<String>),
}

impl ForwardSecret {
    /// Flatten into the set of accepted secrets, dropping blanks
    pub fn secrets(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            ForwardSecret::Joined(joined) => joined.split('|').collect(),
            ForwardSecret::List(list) => list.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for ForwardSecret {
    fn default() -> Self {
        ForwardSecret::Joined(String::new())
    }
}

/// Dimension the client is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum World {
    #[default]
    Overworld,
    Nether,
    TheEnd,
}

impl World {
    pub fn dimension_id(self) -> i8 {
        match self {
            World::Overworld => 0,
            World::Nether => -1,
            World::TheEnd => 1,
        }
    }
}

/// Spawn position and rotation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PositionConfig {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            x: 7.5,
            y: 100.0,
            z: 7.5,
            yaw: 180.0,
            pitch: 0.0,
        }
    }
}

/// Server list (status) response content
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MotdConfig {
    pub description: String,
    pub brand: String,
    /// Hide the player count section
    pub unknown: bool,
    pub max: i32,
    pub online: i32,
    /// Report protocol -1 so clients display the brand instead of a version
    pub show_brand: bool,
    /// Empty, `[file]<path>` or `[encoded]data:image/png;base64,...`
    pub icon: String,
    pub sample: Vec<String>,
}

impl Default for MotdConfig {
    fn default() -> Self {
        Self {
            description: "Limbo server".to_string(),
            brand: "limbo-gate".to_string(),
            unknown: false,
            max: 0,
            online: 0,
            show_brand: false,
            icon: String::new(),
            sample: vec![],
        }
    }
}

/// Content delivered once when a session joins
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JoinMessageConfig {
    pub chat: Vec<String>,
    pub action_bar: String,
    pub title: TitleConfig,
    pub tab: TabConfig,
}

/// Title shown on join; all timings zero disables it
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TitleConfig {
    pub title: String,
    pub sub_title: String,
    pub fade_in: i32,
    pub stay: i32,
    pub fade_out: i32,
}

impl TitleConfig {
    pub fn is_enabled(&self) -> bool {
        self.fade_in != 0 || self.stay != 0 || self.fade_out != 0
    }
}

/// Tab list header and footer lines
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TabConfig {
    pub header: Vec<String>,
    pub footer: Vec<String>,
}

/// First listener name that occurs more than once, if any
pub fn duplicate_name(listeners: &[ListenerConfig]) -> Option<&str> {
    let mut seen = HashSet::new();
    listeners
        .iter()
        .map(|listener| listener.name.as_str())
        .find(|name| !seen.insert(*name))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            watch: false,
            listeners: vec![ListenerConfig::default()],
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 25565,
            debug: false,
            forward_mode: ForwardMode::None,
            forward_secret: ForwardSecret::default(),
            keep_alive_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            brand: "limbo-gate".to_string(),
            world: World::Overworld,
            disable_fall: true,
            position: PositionConfig::default(),
            motd: MotdConfig::default(),
            message: JoinMessageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_secret_splits_on_pipe() {
        let secret = ForwardSecret::Joined("alpha| beta||".to_string());
        assert_eq!(secret.secrets(), vec!["alpha", "beta"]);
    }

    #[test]
    fn listed_secret_drops_blanks() {
        let secret = ForwardSecret::List(vec!["one".into(), " ".into(), "two".into()]);
        assert_eq!(secret.secrets(), vec!["one", "two"]);
    }

    #[test]
    fn duplicate_name_is_detected() {
        let mut a = ListenerConfig::default();
        a.name = "a".into();
        let mut b = ListenerConfig::default();
        b.name = "b".into();
        assert_eq!(duplicate_name(&[a.clone(), b.clone()]), None);
        assert_eq!(duplicate_name(&[a.clone(), b, a]), Some("a"));
    }

    #[test]
    fn partial_listener_table_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[[listeners]]
name = "lobby"
port = 25570
forward_mode = "guard"
forward_secret = ["k1", "k2"]
keep_alive_interval = "5s"
"#,
        )
        .unwrap();
        let listener = &config.listeners[0];
        assert_eq!(listener.name, "lobby");
        assert_eq!(listener.port, 25570);
        assert_eq!(listener.forward_mode, ForwardMode::Guard);
        assert_eq!(listener.forward_secret.secrets(), vec!["k1", "k2"]);
        assert_eq!(listener.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(listener.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }
}
