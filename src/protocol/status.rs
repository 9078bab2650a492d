//! Server list status content

use crate::config::MotdConfig;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

const FILE_ICON_PREFIX: &str = "[file]";
const ENCODED_ICON_PREFIX: &str = "[encoded]";
const SAMPLE_PLAYER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Pre-built status response for one listener snapshot.
///
/// The favicon is resolved once when the snapshot is created so that
/// status requests never touch the filesystem.
#[derive(Debug, Clone)]
pub struct StatusTemplate {
    motd: MotdConfig,
    favicon: Option<String>,
}

impl StatusTemplate {
    pub fn from_config(motd: &MotdConfig) -> Self {
        Self {
            favicon: resolve_favicon(&motd.icon),
            motd: motd.clone(),
        }
    }

    pub fn favicon(&self) -> Option<&str> {
        self.favicon.as_deref()
    }

    /// Status JSON as sent to a client speaking `protocol_version`
    pub fn render(&self, protocol_version: i32) -> String {
        let protocol = if self.motd.show_brand { -1 } else { protocol_version };
        let mut status = json!({
            "version": { "name": self.motd.brand, "protocol": protocol },
            "description": { "text": self.motd.description },
        });

        if !self.motd.unknown {
            let sample: Vec<Value> = self
                .motd
                .sample
                .iter()
                .map(|name| json!({ "name": name, "id": SAMPLE_PLAYER_ID }))
                .collect();
            status["players"] = json!({
                "max": self.motd.max,
                "online": self.motd.online,
                "sample": sample,
            });
        }
        if let Some(favicon) = &self.favicon {
            status["favicon"] = Value::String(favicon.clone());
        }

        status.to_string()
    }
}

fn resolve_favicon(icon: &str) -> Option<String> {
    let icon = icon.trim();
    if icon.is_empty() {
        return None;
    }

    if let Some(path) = icon.strip_prefix(FILE_ICON_PREFIX) {
        let path = Path::new(path.trim());
        return match std::fs::read(path) {
            Ok(bytes) => {
                debug!(path = %path.display(), size = bytes.len(), "Loaded status icon");
                Some(format!("data:image/png;base64,{}", STANDARD.encode(bytes)))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read status icon");
                None
            }
        };
    }

    if let Some(encoded) = icon.strip_prefix(ENCODED_ICON_PREFIX) {
        return Some(encoded.trim().to_string());
    }

    warn!(icon = %icon, "Unrecognised status icon, expected [file] or [encoded] prefix");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn motd() -> MotdConfig {
        MotdConfig {
            description: "Welcome".into(),
            brand: "limbo".into(),
            max: 20,
            online: 3,
            sample: vec!["Alex".into()],
            ..MotdConfig::default()
        }
    }

    #[test]
    fn render_reports_client_protocol() {
        let template = StatusTemplate::from_config(&motd());
        let status: Value = serde_json::from_str(&template.render(47)).unwrap();
        assert_eq!(status["version"]["protocol"], 47);
        assert_eq!(status["version"]["name"], "limbo");
        assert_eq!(status["description"]["text"], "Welcome");
        assert_eq!(status["players"]["max"], 20);
        assert_eq!(status["players"]["sample"][0]["name"], "Alex");
        assert!(status.get("favicon").is_none());
    }

    #[test]
    fn show_brand_and_unknown_players() {
        let mut config = motd();
        config.show_brand = true;
        config.unknown = true;
        let status: Value =
            serde_json::from_str(&StatusTemplate::from_config(&config).render(47)).unwrap();
        assert_eq!(status["version"]["protocol"], -1);
        assert!(status.get("players").is_none());
    }

    #[test]
    fn file_icon_is_base64_encoded() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [1u8, 2, 3]).unwrap();

        let mut config = motd();
        config.icon = format!("[file]{}", file.path().display());
        let template = StatusTemplate::from_config(&config);
        assert_eq!(template.favicon(), Some("data:image/png;base64,AQID"));
    }

    #[test]
    fn encoded_and_invalid_icons() {
        let mut config = motd();
        config.icon = "[encoded]data:image/png;base64,AAAA".into();
        assert_eq!(
            StatusTemplate::from_config(&config).favicon(),
            Some("data:image/png;base64,AAAA")
        );

        config.icon = "http://example.net/icon.png".into();
        assert_eq!(StatusTemplate::from_config(&config).favicon(), None);
    }
}
